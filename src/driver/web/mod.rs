mod driver;

pub use driver::{BrowserType, WebDriver, WebDriverConfig};
