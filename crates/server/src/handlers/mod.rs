//! HTTP request handlers.

pub mod capabilities;
pub mod download;
pub mod health;
pub mod process;
pub mod uploads;

pub use capabilities::*;
pub use download::*;
pub use health::*;
pub use process::*;
pub use uploads::*;
