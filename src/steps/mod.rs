pub mod disks;
pub mod fstab;
pub mod intent;
pub mod postflight;
pub mod preflight;
pub mod repair;
pub mod uninstall;
pub mod usb;
pub mod validate;
