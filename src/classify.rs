use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Blocked,
    NotFound,
    Unavailable,
    AgeRestricted,
    Private,
    Network,
    Unclassified,
}

enum Needle {
    Exact(&'static str),
    Folded(&'static str),
}

// First match wins.
const RULES: &[(ErrorKind, &[Needle])] = &[
    (
        ErrorKind::Blocked,
        &[Needle::Exact("403"), Needle::Exact("Forbidden")],
    ),
    (ErrorKind::NotFound, &[Needle::Exact("404")]),
    (ErrorKind::Unavailable, &[Needle::Folded("unavailable")]),
    (
        ErrorKind::AgeRestricted,
        &[Needle::Exact("Sign in to confirm your age")],
    ),
    (ErrorKind::Private, &[Needle::Exact("Private video")]),
    (
        ErrorKind::Network,
        &[Needle::Folded("network"), Needle::Folded("timeout")],
    ),
];

impl ErrorKind {
    pub fn classify(raw: &str) -> Self {
        let folded = raw.to_lowercase();
        RULES
            .iter()
            .find(|(_, needles)| {
                needles.iter().any(|needle| match needle {
                    Needle::Exact(text) => raw.contains(text),
                    Needle::Folded(text) => folded.contains(text),
                })
            })
            .map_or(Self::Unclassified, |(kind, _)| *kind)
    }

    pub fn message(self, raw: &str) -> String {
        match self {
            Self::Blocked => "The site has temporarily blocked this request, likely due to rate \
                 limiting. Wait a few minutes and try again, or try a different video."
                .to_string(),
            Self::NotFound => "Video not found. It might be private, deleted, or the URL is \
                 incorrect."
                .to_string(),
            Self::Unavailable => {
                "Video is unavailable in this region or has been removed.".to_string()
            }
            Self::AgeRestricted => "This video is age-restricted and cannot be downloaded \
                 without authentication."
                .to_string(),
            Self::Private => "This is a private video and cannot be downloaded.".to_string(),
            Self::Network => "Network error occurred. Check the connection and try again."
                .to_string(),
            Self::Unclassified => format!("Download failed: {raw}"),
        }
    }
}

pub fn classify_error(raw: &str) -> (ErrorKind, String) {
    let kind = ErrorKind::classify(raw);
    (kind, kind.message(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_is_reported_as_blocked() {
        assert_eq!(
            ErrorKind::classify("ERROR: unable to download video data: HTTP Error 403: Forbidden"),
            ErrorKind::Blocked
        );
        assert_eq!(ErrorKind::classify("Forbidden"), ErrorKind::Blocked);
    }

    #[test]
    fn not_found_message_mentions_video_not_found() {
        let (kind, message) = classify_error("HTTP Error 404: Not Found");
        assert_eq!(kind, ErrorKind::NotFound);
        assert!(message.contains("Video not found"));
    }

    #[test]
    fn private_video_is_recognised() {
        let (kind, message) = classify_error("ERROR: [youtube] abc: Private video. Sign in");
        assert_eq!(kind, ErrorKind::Private);
        assert!(message.contains("private video"));
    }

    #[test]
    fn network_timeout_is_network_error() {
        let (kind, message) = classify_error("network timeout");
        assert_eq!(kind, ErrorKind::Network);
        assert!(message.starts_with("Network error"));
        assert_eq!(ErrorKind::classify("Read TIMEOUT"), ErrorKind::Network);
    }

    #[test]
    fn age_gate_is_recognised() {
        assert_eq!(
            ErrorKind::classify("Sign in to confirm your age. This video may be inappropriate"),
            ErrorKind::AgeRestricted
        );
    }

    #[test]
    fn earlier_rules_take_precedence() {
        assert_eq!(
            ErrorKind::classify("HTTP Error 403 while video unavailable"),
            ErrorKind::Blocked
        );
        assert_eq!(
            ErrorKind::classify("Video unavailable: Private video"),
            ErrorKind::Unavailable
        );
        assert_eq!(
            ErrorKind::classify("404 after network retry"),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn unknown_text_is_wrapped() {
        let (kind, message) = classify_error("ffprobe and ffmpeg not found");
        assert_eq!(kind, ErrorKind::Unclassified);
        assert_eq!(message, "Download failed: ffprobe and ffmpeg not found");
    }
}
