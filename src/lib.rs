pub mod driver;
pub mod error;
pub mod parser;
pub mod report;
pub mod runner;
pub mod session;
pub mod utils;
pub mod wait;
pub mod widget;

// Re-export common items
pub use error::{HarnessError, Result};
pub use report::generate_report;
pub use runner::{run_flows, FlowRunner, RunOptions};
pub use session::{Credentials, SessionManager};
pub use utils::HarnessConfig;
pub use widget::{WidgetAdapter, WidgetHandle, WidgetProfile};
