use anyhow::Result;
use tracing::debug;

use crate::{
    utils::url::sanitize_url,
    window_api::{FocusedWindow, WindowSource},
};

use super::WindowSampler;

/// Turns a [WindowSource] into a [WindowSampler] by remembering the last seen window.
pub struct FocusTracker<S> {
    source: S,
    last: Option<FocusedWindow>,
    titles: bool,
}

impl<S: WindowSource> FocusTracker<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            last: None,
            titles: true,
        }
    }

    /// Without titles only the application is kept, so switching tabs or documents inside one
    /// app isn't a change.
    pub fn with_titles(mut self, titles: bool) -> Self {
        self.titles = titles;
        self
    }
}

impl<S: WindowSource> WindowSampler for FocusTracker<S> {
    fn poll(&mut self) -> Result<Option<FocusedWindow>> {
        let current = self.source.current_focus()?.map(|mut window| {
            if self.titles {
                window.browser_url = window.browser_url.as_deref().map(sanitize_url);
            } else {
                window.window_title = None;
                window.browser_url = None;
            }
            window
        });

        if current == self.last {
            return Ok(None);
        }
        debug!("Focus changed to {:?}", current);
        self.last = current.clone();
        Ok(current)
    }

    fn forget(&mut self) {
        self.last = None;
    }
}
