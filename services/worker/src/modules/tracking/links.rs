use chrono::{DateTime, Utc};
use url::Url;
use uuid::Uuid;

/// a valid transparent 1x1 PNG, served on every /opens hit whether or not
/// the open was recorded
pub static TRANSPARENT_PIXEL: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x62, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Builds the tracked redirect url for a destination link
pub fn visit_url(
    public_url: &str,
    destination: &str,
    message_id: Uuid,
    workspace_id: i32,
    at: DateTime<Utc>,
) -> Option<String> {
    let mut url = Url::parse(public_url).ok()?.join("/visit").ok()?;

    url.query_pairs_mut()
        .append_pair("url", destination)
        .append_pair("mid", &message_id.to_string())
        .append_pair("wid", &workspace_id.to_string())
        .append_pair("ts", &at.timestamp().to_string());

    Some(url.into())
}

/// Builds the open pixel url of a message
pub fn open_pixel_url(
    public_url: &str,
    message_id: Uuid,
    workspace_id: i32,
    at: DateTime<Utc>,
) -> String {
    format!(
        "{}/opens?mid={}&wid={}&ts={}",
        public_url.trim_end_matches('/'),
        message_id,
        workspace_id,
        at.timestamp()
    )
}

/// The `<img>` tag appended to tracked html bodies
pub fn open_pixel_tag(
    public_url: &str,
    message_id: Uuid,
    workspace_id: i32,
    at: DateTime<Utc>,
) -> String {
    format!(
        "<img src=\"{}\" width=\"1\" height=\"1\" alt=\"\" style=\"display:none\"/>",
        open_pixel_url(public_url, message_id, workspace_id, at)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visit_urls_encode_the_destination() {
        let mid = Uuid::nil();
        let at: DateTime<Utc> = "2024-06-01T12:00:00Z".parse().unwrap();

        let url = visit_url(
            "https://mail.acme.io",
            "https://acme.io/pricing?utm=x&y=1",
            mid,
            7,
            at,
        )
        .unwrap();

        assert!(url.starts_with("https://mail.acme.io/visit?url="));
        // the destination query separators must survive encoding
        assert!(url.contains("%26y%3D1"));
        assert!(url.contains(&format!("mid={}", mid)));
        assert!(url.contains("wid=7"));
        assert!(url.contains("ts=1717243200"));
    }

    #[test]
    fn the_pixel_tag_is_a_tiny_hidden_img() {
        let tag = open_pixel_tag("https://mail.acme.io/", Uuid::nil(), 7, Utc::now());

        assert!(tag.starts_with("<img src=\"https://mail.acme.io/opens?mid="));
        assert!(tag.contains("width=\"1\""));
        assert!(tag.ends_with("/>"));
    }

    #[test]
    fn the_pixel_bytes_are_a_png() {
        assert_eq!(&TRANSPARENT_PIXEL[..8], b"\x89PNG\r\n\x1a\n");
    }
}
