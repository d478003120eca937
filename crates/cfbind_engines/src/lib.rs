#![forbid(unsafe_code)]

pub mod codeforces;
pub mod role_grant;
pub mod token;

pub(crate) fn bounded_detail(raw: impl Into<String>) -> String {
    let raw = raw.into();
    if raw.len() > 256 {
        raw.chars().take(256).collect()
    } else {
        raw
    }
}
