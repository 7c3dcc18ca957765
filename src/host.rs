//! Side effects on the machine running the relay: opening URLs and showing
//! notifications.

use url::Url;

use crate::Result;

/// Title used when a notification request does not carry one.
pub const DEFAULT_NOTIFICATION_TITLE: &str = "Engine Relay";

/// Where an opened URL should appear.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Disposition {
    Foreground,
    Background,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub text: String,
}

impl Notification {
    #[must_use]
    pub fn new<T: Into<String>, S: Into<String>>(title: T, text: S) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
        }
    }
}

/// Opens URLs and shows notifications on behalf of consumers.
pub trait Host: Send + Sync {
    fn open_url(&self, url: &Url, disposition: Disposition) -> Result<()>;

    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// [`Host`] that only records requests in the log.
///
/// Suitable for headless deployments where consumers have no desktop to act on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHost;

impl Host for LoggingHost {
    fn open_url(&self, url: &Url, disposition: Disposition) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::info!(%url, %disposition, "Open URL requested");
        #[cfg(not(feature = "tracing"))]
        let _ = (url, disposition);
        Ok(())
    }

    fn notify(&self, notification: &Notification) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::info!(title = %notification.title, text = %notification.text, "Notification");
        #[cfg(not(feature = "tracing"))]
        let _ = notification;
        Ok(())
    }
}
