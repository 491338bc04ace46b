//! Input and display probes for macOS using IOKit HIDIdleTime and CoreGraphics.

use core_foundation::base::TCFType;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::display::CGDisplay;
use std::time::Duration;

use super::IdleCounter;
use crate::monitor::DisplayPower;

/// System-wide idle time from the IOHIDSystem registry entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct HidIdle;

impl IdleCounter for HidIdle {
    fn idle_time(&self) -> Option<Duration> {
        #[link(name = "IOKit", kind = "framework")]
        extern "C" {
            fn IOServiceGetMatchingService(
                main_port: u32,
                matching: core_foundation::base::CFTypeRef,
            ) -> u32;
            fn IOServiceMatching(name: *const std::os::raw::c_char) -> core_foundation::base::CFTypeRef;
            fn IORegistryEntryCreateCFProperty(
                entry: u32,
                key: core_foundation::string::CFStringRef,
                allocator: core_foundation::base::CFAllocatorRef,
                options: u32,
            ) -> core_foundation::base::CFTypeRef;
            fn IOObjectRelease(object: u32) -> i32;
        }

        unsafe {
            let service_name = std::ffi::CString::new("IOHIDSystem").ok()?;
            let matching = IOServiceMatching(service_name.as_ptr());
            if matching.is_null() {
                return None;
            }

            // consumes `matching`
            let service = IOServiceGetMatchingService(0, matching);
            if service == 0 {
                return None;
            }

            let key = CFString::new("HIDIdleTime");
            let property =
                IORegistryEntryCreateCFProperty(service, key.as_concrete_TypeRef(), std::ptr::null(), 0);
            IOObjectRelease(service);

            if property.is_null() {
                return None;
            }

            // nanoseconds
            let number: CFNumber = CFNumber::wrap_under_create_rule(property as *mut _);
            let nanos = number.to_i64()?;
            Some(Duration::from_nanos(u64::try_from(nanos).ok()?))
        }
    }
}

/// Power state of the main display.
#[derive(Debug, Clone, Copy, Default)]
pub struct MainDisplay;

impl DisplayPower for MainDisplay {
    fn is_main_display_asleep(&self) -> bool {
        CGDisplay::main().is_asleep()
    }
}
