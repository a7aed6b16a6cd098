//! Shared clipboard with a monotonic version counter.
//!
//! There is no event stream here: intermediate HTTP proxies buffer
//! event streams badly, so browsers poll `GET /api/clipboard/version`
//! (~300ms) and refetch the text when the number changes.

use parking_lot::Mutex;

struct Inner {
    text: String,
    version: u64,
}

pub struct Clipboard {
    inner: Mutex<Inner>,
}

impl Clipboard {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                text: String::new(),
                version: 0,
            }),
        }
    }

    pub fn get(&self) -> String {
        self.inner.lock().text.clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Replace the clipboard text. The version increments on every write,
    /// even when the new content equals the old, so pollers always notice.
    pub fn set(&self, text: String) -> u64 {
        let mut inner = self.inner.lock();
        inner.text = text;
        inner.version += 1;
        inner.version
    }
}

impl Default for Clipboard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_at_version_zero() {
        let clip = Clipboard::new();
        assert_eq!(clip.get(), "");
        assert_eq!(clip.version(), 0);
    }

    #[test]
    fn set_replaces_text_and_bumps_version() {
        let clip = Clipboard::new();
        assert_eq!(clip.set("x".into()), 1);
        assert_eq!(clip.get(), "x");
        assert_eq!(clip.version(), 1);
    }

    #[test]
    fn identical_writes_still_increment() {
        let clip = Clipboard::new();
        clip.set("x".into());
        clip.set("x".into());
        assert_eq!(clip.version(), 2);
    }

    #[test]
    fn version_is_strictly_increasing_across_writes() {
        let clip = Clipboard::new();
        let mut last = clip.version();
        for i in 0..10 {
            let v = clip.set(format!("{i}"));
            assert!(v > last);
            last = v;
        }
    }
}
