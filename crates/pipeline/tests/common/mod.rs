pub mod fixtures;
pub mod flaky;

#[allow(unused_imports)]
pub use fixtures::{people_csv, split_sizes, submission, upload_all, upload_declaring};
#[allow(unused_imports)]
pub use flaky::FlakyStore;
