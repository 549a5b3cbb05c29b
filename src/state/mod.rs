pub mod concurrency;

pub use concurrency::DeployLock;
