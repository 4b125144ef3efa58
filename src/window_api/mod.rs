//! Contains logic for finding out which window has focus in different environments.
//! [GenericWindowSource] is the main artifact of this module that abstracts
//! the operations.

#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "x11")]
extern crate xcb;

use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusedWindow {
    /// Short application name. For example 'firefox' or 'alacritty'
    pub app_name: String,
    /// Title of the window. For example 'bash in hello' or 'Vibing in YouTube - Chrome'
    pub window_title: Option<String>,
    /// Address of the active tab when the application is a browser that exposes it.
    pub browser_url: Option<String>,
}

/// Intended to serve as a contract every platform backend must implement.
#[cfg_attr(test, mockall::automock)]
pub trait WindowSource: Send {
    /// Returns the focused window, or `None` when nothing has focus (locked screen, empty
    /// desktop).
    fn current_focus(&mut self) -> Result<Option<FocusedWindow>>;
}

/// Serves as a cross-compatible [WindowSource] implementation.
pub struct GenericWindowSource {
    inner: Box<dyn WindowSource>,
}

impl GenericWindowSource {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "x11")] {
                use x11::X11WindowSource;
                Ok(Self {
                    inner: Box::new(X11WindowSource::new()?),
                })
            }
            else {
                tracing::warn!("Built without a window backend, only keystrokes will be recorded");
                Ok(Self {
                    inner: Box::new(NoWindowSource),
                })
            }
        }
    }
}

impl WindowSource for GenericWindowSource {
    fn current_focus(&mut self) -> Result<Option<FocusedWindow>> {
        self.inner.current_focus()
    }
}

/// Used when no backend was compiled in.
#[allow(dead_code)]
struct NoWindowSource;

impl WindowSource for NoWindowSource {
    fn current_focus(&mut self) -> Result<Option<FocusedWindow>> {
        Ok(None)
    }
}
