//! Console I/O and the keyboard listener.
//!
//! While a turn is generating or running tools, a [`KeyListener`] watches the
//! keyboard: Esc or Ctrl-C cancels the turn, and printable keys are buffered
//! so the next prompt starts with what the user already typed. Dropping the
//! listener stops it and restores the terminal mode.
//!
//! On a terminal the prompt itself also runs in raw mode, so the carried-over
//! text is part of the editable line and can be erased with Backspace.

use async_trait::async_trait;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::StreamExt;
use helmsman_core::{CancellationToken, TokenSink};
use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::debug;

/// Where the orchestrator reads input and shows output.
#[async_trait]
pub trait Console: Send + Sync {
    /// Next line of input, starting with `prefill`. `None` at end of input.
    async fn read_line(&self, prefill: &str) -> Option<String>;

    /// Show a message to the user.
    fn show(&self, text: &str);

    /// Live-typing callback for streamed generation, if the console wants one.
    fn token_sink(&self) -> Option<TokenSink> {
        None
    }

    /// Attach a keyboard listener for the duration of a turn.
    fn listen(&self, cancel: CancellationToken) -> KeyListener;
}

/// Raw terminal mode, disabled again on drop.
struct RawMode;

impl RawMode {
    fn enable() -> Option<Self> {
        match crossterm::terminal::enable_raw_mode() {
            Ok(()) => Some(Self),
            Err(e) => {
                debug!(error = %e, "Raw mode unavailable");
                None
            }
        }
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

/// Guard for an attached keyboard listener.
pub struct KeyListener {
    typed: Arc<Mutex<String>>,
    task: Option<JoinHandle<()>>,
    _raw: Option<RawMode>,
}

impl KeyListener {
    /// A listener that watches nothing.
    pub fn detached() -> Self {
        Self::with_buffer(Arc::new(Mutex::new(String::new())))
    }

    /// A listener over an existing type-ahead buffer (for scripted consoles).
    pub fn with_buffer(typed: Arc<Mutex<String>>) -> Self {
        Self {
            typed,
            task: None,
            _raw: None,
        }
    }

    /// Keys typed while the listener was attached.
    pub fn typed_ahead(&self) -> String {
        self.typed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for KeyListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Apply one key press to the type-ahead buffer or the turn's token.
pub(crate) fn apply_key(key: KeyEvent, typed: &mut String, cancel: &CancellationToken) {
    if key.kind != KeyEventKind::Press {
        return;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Esc => cancel.cancel(),
        KeyCode::Char('c') if ctrl => cancel.cancel(),
        KeyCode::Char(c) if !ctrl => typed.push(c),
        KeyCode::Backspace => {
            typed.pop();
        }
        _ => {}
    }
}

/// What the prompt does after a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineEdit {
    Continue,
    Submit,
    Quit,
}

/// Apply one key press to the line being edited at the prompt.
pub(crate) fn edit_line(key: KeyEvent, line: &mut String) -> LineEdit {
    if key.kind != KeyEventKind::Press {
        return LineEdit::Continue;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Enter => LineEdit::Submit,
        KeyCode::Char('c') if ctrl => LineEdit::Quit,
        KeyCode::Char('d') if ctrl && line.is_empty() => LineEdit::Quit,
        KeyCode::Char(c) if !ctrl => {
            line.push(c);
            LineEdit::Continue
        }
        KeyCode::Backspace => {
            line.pop();
            LineEdit::Continue
        }
        _ => LineEdit::Continue,
    }
}

/// Read one line in raw mode, starting from `prefill`.
async fn read_raw_line(prefill: &str, _raw: RawMode) -> Option<String> {
    let mut stdout = std::io::stdout();
    let mut line = prefill.to_string();
    let mut events = EventStream::new();

    while let Some(event) = events.next().await {
        let key = match event {
            Ok(Event::Key(key)) => key,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "Keyboard event stream failed");
                return None;
            }
        };

        let before = line.chars().count();
        let edit = edit_line(key, &mut line);
        match edit {
            LineEdit::Submit | LineEdit::Quit => {
                let _ = write!(stdout, "\r\n");
                let _ = stdout.flush();
                return (edit == LineEdit::Submit).then_some(line);
            }
            LineEdit::Continue => {
                let after = line.chars().count();
                if after > before {
                    if let Some(c) = line.chars().last() {
                        let _ = write!(stdout, "{c}");
                    }
                } else if after < before {
                    let _ = write!(stdout, "\x08 \x08");
                }
                let _ = stdout.flush();
            }
        }
    }
    None
}

/// Console on the process's stdin/stdout.
#[derive(Debug, Default)]
pub struct TerminalConsole {
    live_typing: bool,
}

impl TerminalConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo model output to stderr as it streams in.
    pub fn with_live_typing(mut self, enabled: bool) -> Self {
        self.live_typing = enabled;
        self
    }
}

#[async_trait]
impl Console for TerminalConsole {
    async fn read_line(&self, prefill: &str) -> Option<String> {
        print!("\n> {prefill}");
        let _ = std::io::stdout().flush();

        if std::io::stdin().is_terminal()
            && let Some(raw) = RawMode::enable()
        {
            return read_raw_line(prefill, raw).await;
        }

        let line = tokio::task::spawn_blocking(|| {
            let mut buf = String::new();
            match std::io::stdin().read_line(&mut buf) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(buf),
            }
        })
        .await
        .ok()
        .flatten()?;

        Some(format!("{prefill}{}", line.trim_end_matches(['\r', '\n'])))
    }

    fn show(&self, text: &str) {
        // Raw mode needs explicit carriage returns
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "{}\r\n", text.replace('\n', "\r\n"));
        let _ = stdout.flush();
    }

    fn token_sink(&self) -> Option<TokenSink> {
        self.live_typing.then(|| {
            Arc::new(|delta: &str| {
                let mut stderr = std::io::stderr();
                let _ = write!(stderr, "{}", delta.replace('\n', "\r\n"));
                let _ = stderr.flush();
            }) as TokenSink
        })
    }

    fn listen(&self, cancel: CancellationToken) -> KeyListener {
        if !std::io::stdin().is_terminal() {
            return KeyListener::detached();
        }
        let Some(raw) = RawMode::enable() else {
            return KeyListener::detached();
        };

        let typed = Arc::new(Mutex::new(String::new()));
        let buffer = typed.clone();
        let task = tokio::spawn(async move {
            let mut events = EventStream::new();
            while let Some(event) = events.next().await {
                match event {
                    Ok(Event::Key(key)) => {
                        let mut typed = buffer.lock().unwrap_or_else(PoisonError::into_inner);
                        apply_key(key, &mut typed, &cancel);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Keyboard event stream failed");
                        break;
                    }
                }
            }
        });

        KeyListener {
            typed,
            task: Some(task),
            _raw: Some(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn escape_cancels() {
        let cancel = CancellationToken::new();
        let mut typed = String::new();
        apply_key(press(KeyCode::Esc, KeyModifiers::NONE), &mut typed, &cancel);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn ctrl_c_cancels_without_typing() {
        let cancel = CancellationToken::new();
        let mut typed = String::new();
        apply_key(press(KeyCode::Char('c'), KeyModifiers::CONTROL), &mut typed, &cancel);
        assert!(cancel.is_cancelled());
        assert!(typed.is_empty());
    }

    #[test]
    fn keys_are_buffered_with_backspace() {
        let cancel = CancellationToken::new();
        let mut typed = String::new();
        for c in "lsx".chars() {
            apply_key(press(KeyCode::Char(c), KeyModifiers::NONE), &mut typed, &cancel);
        }
        apply_key(press(KeyCode::Backspace, KeyModifiers::NONE), &mut typed, &cancel);
        apply_key(press(KeyCode::Char('S'), KeyModifiers::SHIFT), &mut typed, &cancel);
        assert_eq!(typed, "lsS");
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn releases_are_ignored() {
        let cancel = CancellationToken::new();
        let mut typed = String::new();
        let mut release = press(KeyCode::Esc, KeyModifiers::NONE);
        release.kind = KeyEventKind::Release;
        apply_key(release, &mut typed, &cancel);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn prefill_can_be_erased_at_the_prompt() {
        let mut line = "git st".to_string();
        for _ in 0..6 {
            assert_eq!(
                edit_line(press(KeyCode::Backspace, KeyModifiers::NONE), &mut line),
                LineEdit::Continue
            );
        }
        assert!(line.is_empty());
        for c in "ls".chars() {
            edit_line(press(KeyCode::Char(c), KeyModifiers::NONE), &mut line);
        }
        assert_eq!(
            edit_line(press(KeyCode::Enter, KeyModifiers::NONE), &mut line),
            LineEdit::Submit
        );
        assert_eq!(line, "ls");
    }

    #[test]
    fn ctrl_d_quits_only_on_an_empty_line() {
        let mut line = "x".to_string();
        assert_eq!(
            edit_line(press(KeyCode::Char('d'), KeyModifiers::CONTROL), &mut line),
            LineEdit::Continue
        );
        assert_eq!(line, "x");
        line.clear();
        assert_eq!(
            edit_line(press(KeyCode::Char('d'), KeyModifiers::CONTROL), &mut line),
            LineEdit::Quit
        );
        assert_eq!(
            edit_line(press(KeyCode::Char('c'), KeyModifiers::CONTROL), &mut line),
            LineEdit::Quit
        );
    }

    #[test]
    fn detached_listener_has_no_type_ahead() {
        assert_eq!(KeyListener::detached().typed_ahead(), "");
    }

    #[test]
    fn shared_buffer_is_visible() {
        let buffer = Arc::new(Mutex::new("git st".to_string()));
        let listener = KeyListener::with_buffer(buffer);
        assert_eq!(listener.typed_ahead(), "git st");
    }
}
