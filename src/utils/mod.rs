pub mod config;

pub use config::{HarnessConfig, LoginPolicy, Timeouts};

/// Replace anything that is not alphanumeric, so a name is safe as a file stem
pub fn safe_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}
