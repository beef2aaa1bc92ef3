use chatbox_status_core::PushUpdate;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid push message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary push frame is not utf-8")]
    NotUtf8,
}

/// Wire shape sent by the browser extension. Times are in seconds.
#[derive(Debug, Deserialize)]
struct WirePush {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    streamer: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default, rename = "currentTime")]
    current_time: Option<f64>,
    #[serde(default)]
    live: Option<bool>,
}

pub fn parse_push_message(text: &str) -> Result<PushUpdate, ParseError> {
    let wire: WirePush = serde_json::from_str(text)?;

    // streamer wins over uploader when both are present
    let source = [wire.streamer, wire.uploader]
        .into_iter()
        .flatten()
        .map(strip_nul)
        .find(|s| !s.is_empty())
        .unwrap_or_default();

    Ok(PushUpdate {
        title: wire.title.map(strip_nul).unwrap_or_default(),
        source,
        duration_secs: wire.duration.unwrap_or(0.0),
        position_secs: wire.current_time.unwrap_or(0.0),
        is_live: wire.live.unwrap_or(false),
    })
}

/// The OSC sink cannot carry NUL, so it never enters the store.
fn strip_nul(value: String) -> String {
    if value.contains('\0') {
        value.replace('\0', "")
    } else {
        value
    }
}

pub fn parse_push_frame(bytes: &[u8]) -> Result<PushUpdate, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
    parse_push_message(text)
}

#[cfg(test)]
mod tests {
    use super::{parse_push_frame, parse_push_message, ParseError};

    #[test]
    fn full_message() {
        let update = parse_push_message(
            r#"{"title":"Lo-fi beats","streamer":"lofigirl","uploader":"ignored",
                "duration":0,"currentTime":1234.5,"live":true,"url":"https://x"}"#,
        )
        .unwrap();

        assert_eq!(update.title, "Lo-fi beats");
        assert_eq!(update.source, "lofigirl");
        assert_eq!(update.position_secs, 1234.5);
        assert!(update.is_live);
    }

    #[test]
    fn uploader_used_when_streamer_missing_or_empty() {
        let update =
            parse_push_message(r#"{"title":"Clip","streamer":"","uploader":"someone"}"#).unwrap();
        assert_eq!(update.source, "someone");
    }

    #[test]
    fn nul_characters_are_dropped() {
        let update = parse_push_message(
            r#"{"title":"A\u0000B","streamer":"\u0000","uploader":"up\u0000loader"}"#,
        )
        .unwrap();
        assert_eq!(update.title, "AB");
        assert_eq!(update.source, "uploader");
    }

    #[test]
    fn missing_fields_default() {
        let update = parse_push_message("{}").unwrap();
        assert!(update.title.is_empty());
        assert!(update.source.is_empty());
        assert_eq!(update.duration_secs, 0.0);
        assert_eq!(update.position_secs, 0.0);
        assert!(!update.is_live);

        let nulls = parse_push_message(r#"{"title":null,"duration":null}"#).unwrap();
        assert!(nulls.title.is_empty());
    }

    #[test]
    fn rejects_non_json_and_wrong_types() {
        assert!(matches!(parse_push_message("hello"), Err(ParseError::Json(_))));
        assert!(matches!(
            parse_push_message(r#"{"duration":"long"}"#),
            Err(ParseError::Json(_))
        ));
        assert!(matches!(
            parse_push_frame(&[0xff, 0xfe]),
            Err(ParseError::NotUtf8)
        ));
    }
}
