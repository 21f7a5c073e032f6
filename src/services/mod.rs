pub mod intake;
pub mod progress;
pub mod reports;
pub mod scanner;
pub mod storage;
pub mod sweeper;
