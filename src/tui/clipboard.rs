use anyhow::Result;
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

static CLIPBOARD: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// Clipboard writes happen on one background thread. On Linux the owner must
/// stay alive for a moment or clipboard managers never see the contents.
fn clipboard_sender() -> &'static std_mpsc::Sender<String> {
    CLIPBOARD.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();
        std::thread::spawn(move || {
            for text in rx {
                match arboard::Clipboard::new() {
                    Ok(mut cb) => {
                        if let Err(e) = cb.set_text(text) {
                            tracing::warn!("clipboard write failed: {e}");
                            continue;
                        }
                        std::thread::sleep(Duration::from_secs(2));
                    }
                    Err(e) => tracing::warn!("clipboard unavailable: {e}"),
                }
            }
        });
        tx
    })
}

/// Queue `text` for the clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: String) -> Result<()> {
    clipboard_sender()
        .send(text)
        .map_err(|_| anyhow::anyhow!("clipboard worker stopped"))
}
