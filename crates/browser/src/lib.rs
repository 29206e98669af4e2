//! Browser automation over the Chrome DevTools Protocol.
//!
//! - `cdp`: WebSocket command client
//! - `launcher`: Chrome/Edge process launch and page-target discovery
//! - `page`: the `BrowserPage` capability the replay pipeline drives
//! - `scanner`: the `AccessibilityScanner` capability backed by axe-core

pub mod cdp;
pub mod launcher;
pub mod page;
pub mod scanner;

pub use cdp::CdpClient;
pub use launcher::{launch_browser, BrowserEngine, BrowserSession};
pub use page::{BrowserPage, CdpPage, LoadState};
pub use scanner::{AccessibilityScanner, AxeScanner};
