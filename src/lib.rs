pub mod api;
pub mod compositor;
pub mod config;
pub mod convert;
pub mod error;
pub mod ffmpeg;
pub mod finalizer;
pub mod images;
pub mod init;
pub mod pipeline;
pub mod selector;

pub(crate) fn logv(tag: &str, message: &str) {
    eprintln!("[{}] {}", tag, message);
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}
