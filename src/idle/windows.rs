//! Input probe for Windows using the GetLastInputInfo Win32 API.

use std::time::Duration;
use windows::Win32::System::SystemInformation::GetTickCount;
use windows::Win32::UI::Input::KeyboardAndMouse::{GetLastInputInfo, LASTINPUTINFO};

use super::IdleCounter;

/// Session-wide idle time from the last input tick count.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastInput;

impl IdleCounter for LastInput {
    fn idle_time(&self) -> Option<Duration> {
        let mut last_input = LASTINPUTINFO {
            cbSize: std::mem::size_of::<LASTINPUTINFO>() as u32,
            dwTime: 0,
        };

        unsafe {
            if !GetLastInputInfo(&mut last_input).as_bool() {
                return None;
            }
            // tick counts wrap every ~49.7 days
            let idle_ms = GetTickCount().wrapping_sub(last_input.dwTime);
            Some(Duration::from_millis(u64::from(idle_ms)))
        }
    }
}
