use core::time::Duration;

/// A parsed request line.
///
/// The protocol is one request per line, `<COMMAND> [argument]`, with the
/// command matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `ECHO <text>`: reply with the text unchanged.
    Echo(String),
    /// `UPPER <text>`: reply with the text upper-cased.
    Upper(String),
    /// `REVERSE <text>`: reply with the characters reversed.
    Reverse(String),
    /// `SLEEP <ms>`: complete after the given delay.
    Sleep(u64),
    /// `PING`: liveness probe. Fire-and-forget; not ordered with other
    /// replies.
    Ping,
    /// Anything unparseable. Still gets an (ordered) `ERR` reply.
    Invalid(String),
}

impl Request {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches('\r');
        let (command, arg) = match line.split_once(' ') {
            Some((command, arg)) => (command, arg),
            None => (line, ""),
        };

        match command.to_ascii_uppercase().as_str() {
            "ECHO" => Self::Echo(arg.to_string()),
            "UPPER" => Self::Upper(arg.to_string()),
            "REVERSE" => Self::Reverse(arg.to_string()),
            "SLEEP" => match arg.trim().parse() {
                Ok(ms) => Self::Sleep(ms),
                Err(_) => Self::Invalid(format!("invalid sleep duration: {arg}")),
            },
            "PING" => Self::Ping,
            "" => Self::Invalid("empty request".to_string()),
            other => Self::Invalid(format!("unknown command: {other}")),
        }
    }

    /// Requests whose reply may overtake earlier ones.
    pub const fn is_unordered(&self) -> bool {
        matches!(self, Self::Ping)
    }
}

/// Executes a request and returns the reply body.
///
/// Runs on a pool worker. `max_sleep` caps `SLEEP` so a client cannot park a
/// worker indefinitely.
pub async fn process(request: Request, max_sleep: Duration) -> String {
    match request {
        Request::Echo(text) => text,
        Request::Upper(text) => text.to_uppercase(),
        Request::Reverse(text) => text.chars().rev().collect(),
        Request::Sleep(ms) => {
            let delay = Duration::from_millis(ms);
            if delay > max_sleep {
                return format!("ERR sleep exceeds maximum of {}ms", max_sleep.as_millis());
            }
            tokio::time::sleep(delay).await;
            format!("SLEPT {ms}")
        }
        Request::Ping => "PONG".to_string(),
        Request::Invalid(reason) => format!("ERR {reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_case_insensitively() {
        assert_eq!(Request::parse("echo hi there"), Request::Echo("hi there".into()));
        assert_eq!(Request::parse("UPPER abc\r"), Request::Upper("abc".into()));
        assert_eq!(Request::parse("Reverse xyz"), Request::Reverse("xyz".into()));
        assert_eq!(Request::parse("SLEEP 25"), Request::Sleep(25));
        assert_eq!(Request::parse("ping"), Request::Ping);
    }

    #[test]
    fn invalid_requests_carry_a_reason() {
        assert_eq!(Request::parse(""), Request::Invalid("empty request".into()));
        assert_eq!(
            Request::parse("SLEEP soon"),
            Request::Invalid("invalid sleep duration: soon".into())
        );
        assert_eq!(
            Request::parse("FETCH x"),
            Request::Invalid("unknown command: FETCH".into())
        );
    }

    #[test]
    fn only_ping_is_unordered() {
        assert!(Request::Ping.is_unordered());
        assert!(!Request::Echo(String::new()).is_unordered());
        assert!(!Request::Invalid(String::new()).is_unordered());
    }

    #[tokio::test]
    async fn process_builds_reply_bodies() {
        let max = Duration::from_millis(50);
        assert_eq!(process(Request::Echo("a b".into()), max).await, "a b");
        assert_eq!(process(Request::Upper("ab".into()), max).await, "AB");
        assert_eq!(process(Request::Reverse("abc".into()), max).await, "cba");
        assert_eq!(process(Request::Sleep(1), max).await, "SLEPT 1");
        assert_eq!(process(Request::Ping, max).await, "PONG");
        assert_eq!(
            process(Request::Sleep(51), max).await,
            "ERR sleep exceeds maximum of 50ms"
        );
        assert_eq!(
            process(Request::Invalid("nope".into()), max).await,
            "ERR nope"
        );
    }
}
