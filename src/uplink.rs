//! Network upload path
//!
//! A node with a network adapter hands every frame to the collector's API
//! first and only falls back to the radio when the upload fails. Without a
//! configured endpoint ([`crate::UplinkSettings`]) there is no upstream and
//! all frames go over the radio.

use log::log;

use crate::UplinkSettings;

/// Upload collaborator
pub trait Uplink {
    /// Posts one encoded frame to `settings.host:settings.port`, joining the
    /// network with the configured credentials first if needed
    ///
    /// # Returns
    /// true if the collector accepted the frame
    fn post(&mut self, settings: &UplinkSettings<'_>, frame: &[u8]) -> bool;
}

impl<U: Uplink + ?Sized> Uplink for &mut U {
    fn post(&mut self, settings: &UplinkSettings<'_>, frame: &[u8]) -> bool {
        (**self).post(settings, frame)
    }
}

/// Uplink of a node without network hardware, every post fails
#[derive(Clone, Copy, Debug, Default)]
pub struct NoUplink;

impl Uplink for NoUplink {
    fn post(&mut self, _settings: &UplinkSettings<'_>, _frame: &[u8]) -> bool {
        false
    }
}

/// Configured upload path: a client and the endpoint it posts to
pub struct Upstream<'a, U: Uplink> {
    client: U,
    settings: UplinkSettings<'a>,
}

impl<'a, U: Uplink> Upstream<'a, U> {
    pub fn new(client: U, settings: UplinkSettings<'a>) -> Self {
        Upstream { client, settings }
    }

    pub fn settings(&self) -> &UplinkSettings<'a> {
        &self.settings
    }

    pub fn client(&self) -> &U {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut U {
        &mut self.client
    }

    /// Uploads one encoded frame, true on success
    pub fn post(&mut self, frame: &[u8]) -> bool {
        let accepted = self.client.post(&self.settings, frame);
        if !accepted {
            log!(
                log::Level::Warn,
                "Upload to {}:{} failed, falling back to radio",
                self.settings.host,
                self.settings.port
            );
        }
        accepted
    }
}

#[cfg(feature = "http-uplink")]
pub use http::HttpUplink;

#[cfg(feature = "http-uplink")]
mod http {
    use super::*;

    /// HTTP uplink for hosted nodes
    ///
    /// Posts the raw frame bytes to `http://host:port/` as
    /// `application/octet-stream`. The host is expected to be online already,
    /// the wifi credentials are not used.
    pub struct HttpUplink {
        agent: ureq::Agent,
    }

    impl HttpUplink {
        pub fn new(timeout: std::time::Duration) -> Self {
            HttpUplink {
                agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            }
        }
    }

    impl Uplink for HttpUplink {
        fn post(&mut self, settings: &UplinkSettings<'_>, frame: &[u8]) -> bool {
            let url = format!("http://{}:{}/", settings.host, settings.port);
            match self
                .agent
                .post(&url)
                .set("Content-Type", "application/octet-stream")
                .send_bytes(frame)
            {
                Ok(response) => {
                    log!(log::Level::Debug, "Posted {} bytes to {}, status {}", frame.len(), url, response.status());
                    true
                }
                Err(error) => {
                    log!(log::Level::Warn, "Post to {} failed: {}", url, error);
                    false
                }
            }
        }
    }
}

/// Uplink double recording every post
#[cfg(all(test, feature = "std"))]
pub(crate) struct RecordingUplink {
    pub accept: bool,
    pub posts: Vec<Vec<u8>>,
}

#[cfg(all(test, feature = "std"))]
impl RecordingUplink {
    pub fn accepting(accept: bool) -> Self {
        RecordingUplink { accept, posts: Vec::new() }
    }
}

#[cfg(all(test, feature = "std"))]
impl Uplink for RecordingUplink {
    fn post(&mut self, _settings: &UplinkSettings<'_>, frame: &[u8]) -> bool {
        self.posts.push(frame.to_vec());
        self.accept
    }
}
