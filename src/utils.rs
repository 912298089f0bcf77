//! Utility functions for link normalization and export file naming

use chrono::{DateTime, FixedOffset, Offset, Utc};
use url::Url;

/// Host of the publishing platform whose article links carry identity parameters
pub const PLATFORM_HOST: &str = "mp.weixin.qq.com";

/// Query parameters that vary between shares of the same item
const TRACKING_PARAMS: &[&str] = &[
    "chksm",
    "scene",
    "srcid",
    "sharer_sharetime",
    "sharer_shareid",
    "from",
    "isappinstalled",
    "clicktime",
    "enterid",
    "ascene",
    "devicetype",
    "version",
    "nettype",
    "abtest_cookie",
    "lang",
    "exportkey",
    "pass_ticket",
    "wx_header",
    "key",
    "uin",
];

/// Maximum length of a sanitized filename component, in characters
const MAX_FILENAME_CHARS: usize = 200;

/// Normalize an item link into its stable identity form
///
/// Platform article links are reduced to `__biz`, `mid`, `idx` (default `1`)
/// and `sn`. Other links lose their fragment and any tracking parameters.
/// Strings that do not parse as URLs are returned trimmed. Normalizing an
/// already normalized link returns it unchanged.
///
/// # Examples
///
/// ```
/// use pubsync::utils::normalize_link;
///
/// let link = "https://mp.weixin.qq.com/s?__biz=MzA5&mid=22&sn=abc&chksm=ff&scene=27#rd";
/// let canonical = normalize_link(link);
/// assert_eq!(canonical, "https://mp.weixin.qq.com/s?__biz=MzA5&mid=22&idx=1&sn=abc");
/// assert_eq!(normalize_link(&canonical), canonical);
/// ```
pub fn normalize_link(link: &str) -> String {
    let trimmed = link.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    if url.host_str() == Some(PLATFORM_HOST)
        && let Some(canonical) = canonical_platform_link(&url)
    {
        return canonical;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    url.set_fragment(None);
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    url.to_string()
}

fn canonical_platform_link(url: &Url) -> Option<String> {
    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    };

    let biz = param("__biz")?;
    let mid = param("mid")?;
    let sn = param("sn")?;
    let idx = param("idx").unwrap_or_else(|| "1".to_string());

    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("__biz", &biz)
        .append_pair("mid", &mid)
        .append_pair("idx", &idx)
        .append_pair("sn", &sn)
        .finish();

    Some(format!("https://{PLATFORM_HOST}/s?{query}"))
}

fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name)
}

/// Make a string safe to use as a file or directory name
///
/// Replaces `\ / : * ? " < > |` with `_`, collapses runs of underscores and
/// whitespace, trims leading and trailing underscores and whitespace, and
/// caps the result at 200 characters. An empty result becomes `untitled`.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last: Option<char> = None;

    for c in input.chars() {
        let c = match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => ' ',
            c => c,
        };
        if (c == '_' || c == ' ') && last == Some(c) {
            continue;
        }
        result.push(c);
        last = Some(c);
    }

    let trimmed: String = result
        .trim_matches(|c: char| c == '_' || c.is_whitespace())
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect();

    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed
    }
}

/// Convert epoch seconds into a date at the given UTC offset
///
/// Out-of-range inputs fall back to the Unix epoch and UTC.
pub fn local_time(epoch_secs: i64, utc_offset_minutes: i32) -> DateTime<FixedOffset> {
    let offset = utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());
    DateTime::<Utc>::from_timestamp(epoch_secs, 0)
        .unwrap_or_default()
        .with_timezone(&offset)
}

/// Expand an export filename template for one item
///
/// Supported placeholders are `${YYYY}`, `${MM}`, `${DD}`, `${HH}`, `${mm}`
/// and `${title}`. The title is sanitized before substitution; the rest of
/// the template is used verbatim.
///
/// # Examples
///
/// ```
/// use pubsync::utils::format_export_filename;
///
/// let name = format_export_filename("${YYYY}-${MM}-${DD} ${title}", "A/B", 0, 0);
/// assert_eq!(name, "1970-01-01 A_B");
/// ```
pub fn format_export_filename(
    template: &str,
    title: &str,
    create_time: i64,
    utc_offset_minutes: i32,
) -> String {
    let time = local_time(create_time, utc_offset_minutes);

    template
        .replace("${YYYY}", &time.format("%Y").to_string())
        .replace("${MM}", &time.format("%m").to_string())
        .replace("${DD}", &time.format("%d").to_string())
        .replace("${HH}", &time.format("%H").to_string())
        .replace("${mm}", &time.format("%M").to_string())
        .replace("${title}", &sanitize_filename(title))
}

/// Render a duration in seconds as `1h 2m 3s`, omitting zero leading units
pub fn format_elapsed(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::with_capacity(3);
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }
    parts.join(" ")
}
