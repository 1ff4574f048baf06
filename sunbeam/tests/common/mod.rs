pub mod assertions;
pub mod fixtures;
pub mod logging;

pub use assertions::{assert_contains, assert_failed_with};
pub use fixtures::FakeJuju;
pub use logging::init_test_logging;
