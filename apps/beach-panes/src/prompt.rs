use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::DEFAULT_PTY_BUFFER_LIMIT;

/// Bytes kept from the end of the buffer when it overflows.
const OVERFLOW_TAIL: usize = 4 * 1024;

static ANSI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-?]*[ -/]*[@-~]",            // CSI: colors, cursor moves, modes
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)", // OSC: window titles, cwd reports
        r"|\x1b[()*+][0-9A-Za-z]",             // charset designation
        r"|\x1b[@-Z\\-_]",                     // two-byte escapes
        r"|[\x00-\x08\x0b\x0c\x0e-\x1f\x7f]",  // stray C0 controls
    ))
    .expect("ansi regex")
});

// `user@host:path$ `, `[user@host dir]# `, `bash-5.2$ `, `(venv) user@host:~$ `
// or a bare `$ `; every segment before the sigil is optional.
static PROMPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?:\([^)]*\) ?)?",
        r"\[?(?:[\w.\-]+@)?[\w.\-]*",
        r"(?::[^\s$#\]]*)?",
        r"(?: [^\s$#\]]+)?\]?",
        r"[$#] $",
    ))
    .expect("prompt regex")
});

pub fn strip_ansi(text: &str) -> String {
    ANSI.replace_all(text, "").into_owned()
}

/// True when the last logical line of `text` (after escape stripping) looks
/// like an interactive shell prompt.
pub fn ends_with_prompt(text: &str) -> bool {
    let stripped = strip_ansi(text);
    let line = stripped
        .rsplit(['\n', '\r'])
        .next()
        .unwrap_or_default();
    PROMPT.is_match(line)
}

/// Accumulates PTY output for one connection until a prompt shows up.
#[derive(Debug)]
pub struct PromptDetector {
    buffer: String,
    limit: usize,
    detected: bool,
}

impl Default for PromptDetector {
    fn default() -> Self {
        Self::new(DEFAULT_PTY_BUFFER_LIMIT)
    }
}

impl PromptDetector {
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: String::new(),
            limit: limit.max(OVERFLOW_TAIL),
            detected: false,
        }
    }

    /// Appends `chunk` and returns true exactly once per connection, on the
    /// chunk that completes the first prompt. Further output is not buffered.
    pub fn feed(&mut self, chunk: &str) -> bool {
        if self.detected {
            return false;
        }
        self.buffer.push_str(chunk);
        if self.buffer.len() > self.limit {
            self.truncate_to_tail();
        }
        if ends_with_prompt(&self.buffer) {
            self.detected = true;
            self.buffer = String::new();
            return true;
        }
        false
    }

    pub fn detected(&self) -> bool {
        self.detected
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Re-arms detection; used whenever a new socket is opened.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.detected = false;
    }

    fn truncate_to_tail(&mut self) {
        let mut cut = self.buffer.len().saturating_sub(OVERFLOW_TAIL);
        while !self.buffer.is_char_boundary(cut) {
            cut += 1;
        }
        self.buffer.drain(..cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_colors_and_titles() {
        let text = "\u{1b}]0;user@host: ~\u{7}\u{1b}[01;32muser@host\u{1b}[00m:\u{1b}[01;34m~\u{1b}[00m$ ";
        assert_eq!(strip_ansi(text), "user@host:~$ ");
    }

    #[test]
    fn detects_prompt_with_color_reset_inside_host() {
        assert!(ends_with_prompt("\u{1b}[32muser@host\u{1b}[0m:~$ "));
    }

    #[test]
    fn detects_common_prompt_shapes() {
        for prompt in [
            "user@host:~$ ",
            "root@box:/var/log# ",
            "[deploy@web-01 app]$ ",
            "(venv) dev@laptop:~/src$ ",
            "bash-5.2$ ",
            "$ ",
            "Last login: Mon\r\nuser@host:~$ ",
        ] {
            assert!(ends_with_prompt(prompt), "missed {prompt:?}");
        }
    }

    #[test]
    fn ignores_non_prompt_output() {
        for text in [
            "Booting shell...\r\n",
            "price: $5\r\n",
            "user@host:~$ ls\r\n",
            "echo $HOME",
            "100% done $",
        ] {
            assert!(!ends_with_prompt(text), "false positive on {text:?}");
        }
    }

    #[test]
    fn detector_latches_and_clears_buffer() {
        let mut detector = PromptDetector::default();
        assert!(!detector.feed("Welcome to the shell\r\n"));
        assert!(!detector.feed("\u{1b}[32muser@"));
        assert!(detector.feed("host\u{1b}[0m:~$ "));
        assert!(detector.detected());
        assert_eq!(detector.buffered_len(), 0);
        assert!(!detector.feed("user@host:~$ "));
        assert_eq!(detector.buffered_len(), 0);

        detector.reset();
        assert!(!detector.detected());
        assert!(detector.feed("user@host:~$ "));
    }

    #[test]
    fn buffer_is_bounded_under_noisy_output() {
        let mut detector = PromptDetector::new(8 * 1024);
        let noise = "é".repeat(1_000);
        for _ in 0..100 {
            assert!(!detector.feed(&noise));
        }
        assert!(detector.buffered_len() <= 8 * 1024);
        assert!(detector.feed("\r\nuser@host:~$ "));
    }
}
