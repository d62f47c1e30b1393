use std::sync::LazyLock;

use regex::Regex;

// `/c/150x150/img-master/` or a bare `/img-master/`.
static CACHE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:/c/[^/]+)?/img-master/").unwrap());

// `12345_p0_master1200.jpg` -> keeps `12345_p0` and `.jpg`.
static SIZE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(_p\d+)_[A-Za-z]+\d*(\.[A-Za-z0-9]+)$").unwrap());

/// Maps a cache-resolution image URL to the original upload.
///
/// URLs without the cache marker are returned as-is, so feeding an already
/// original URL back in is a no-op.
pub fn to_original(url: &str) -> String {
    if !CACHE_MARKER.is_match(url) {
        return url.to_string();
    }
    let url = CACHE_MARKER.replace(url, "/img-original/");
    SIZE_SUFFIX.replace(&url, "$1$2").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const THUMB: &str =
        "https://i.pximg.net/c/150x150/img-master/img/2017/01/01/00/00/00/12345_p0_master1200.jpg";
    const ORIGINAL: &str =
        "https://i.pximg.net/img-original/img/2017/01/01/00/00/00/12345_p0.jpg";

    #[test]
    fn test_thumbnail_to_original() {
        assert_eq!(to_original(THUMB), ORIGINAL);
    }

    #[test]
    fn test_square_thumbnail_keeps_page_and_extension() {
        let url = "https://i.pximg.net/c/250x250_80_a2/img-master/img/2020/05/06/07/08/09/777_p3_square1200.png";
        assert_eq!(
            to_original(url),
            "https://i.pximg.net/img-original/img/2020/05/06/07/08/09/777_p3.png"
        );
    }

    #[test]
    fn test_idempotent() {
        let once = to_original(THUMB);
        assert_eq!(to_original(&once), once);
        assert_eq!(to_original(ORIGINAL), ORIGINAL);
    }

    #[test]
    fn test_unrelated_url_passes_through() {
        let url = "https://example.com/images/cat_p1_large2.jpg";
        assert_eq!(to_original(url), url);
    }
}
