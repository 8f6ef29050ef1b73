//! Client view model: the latest snapshot of every job a user can see.

mod board;
mod live;

pub use board::{Action, JobActions, JobBoard, JobRow, ViewError};
pub use live::LiveJobBoard;
