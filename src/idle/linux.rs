//! Input and display probes for Linux using the X11 XScreenSaver and DPMS extensions.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::dpms::{ConnectionExt as DpmsConnectionExt, DPMSMode};
use x11rb::protocol::screensaver::ConnectionExt as ScreensaverConnectionExt;
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

use super::IdleCounter;
use crate::monitor::DisplayPower;

/// A shared X11 connection to the default display's root window.
#[derive(Clone)]
pub struct X11Session {
    conn: Arc<RustConnection>,
    root: Window,
}

impl X11Session {
    /// Connect to `$DISPLAY` and check the screensaver extension works.
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = RustConnection::connect(None)
            .context("Failed to connect to X11 display. Is DISPLAY set?")?;
        let root = conn.setup().roots[screen_num].root;

        conn.screensaver_query_info(root)
            .context("XScreenSaver extension not available")?
            .reply()
            .context("Failed to query XScreenSaver info")?;

        info!("Using X11 XScreenSaver for input activity");
        Ok(Self {
            conn: Arc::new(conn),
            root,
        })
    }
}

impl IdleCounter for X11Session {
    fn idle_time(&self) -> Option<Duration> {
        let reply = self
            .conn
            .screensaver_query_info(self.root)
            .ok()?
            .reply()
            .ok()?;

        Some(Duration::from_millis(u64::from(reply.ms_since_user_input)))
    }
}

impl DisplayPower for X11Session {
    fn is_main_display_asleep(&self) -> bool {
        let reply = match self.conn.dpms_info().map(|cookie| cookie.reply()) {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!("Failed to query DPMS state: {}", e);
                return false;
            }
            Err(e) => {
                debug!("DPMS extension not available: {}", e);
                return false;
            }
        };

        reply.state && reply.power_level != DPMSMode::ON
    }
}
