use url::Url;

pub fn get_filename_from_url(url_str: &str) -> String {
    if let Ok(url) = Url::parse(url_str) {
        if let Some(filename) = url.path_segments().and_then(|mut s| s.next_back()) {
            if !filename.is_empty() {
                return filename.to_string();
            }
        }
    }

    // Fallback if no filename found in path
    format!("download_{}", uuid::Uuid::new_v4())
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

/// True when the URL path (ignoring any query) names a `.jpg` file.
pub fn has_jpg_extension(url_str: &str) -> bool {
    match Url::parse(url_str) {
        Ok(url) => url.path().ends_with(".jpg"),
        Err(_) => url_str.ends_with(".jpg"),
    }
}

/// Swaps a trailing `.jpg` for `.png`. Anything else is returned unchanged.
pub fn jpg_to_png(value: &str) -> String {
    match value.strip_suffix(".jpg") {
        Some(stem) => format!("{stem}.png"),
        None => value.to_string(),
    }
}

/// Same as [`jpg_to_png`] but applied to the path of a URL, leaving the query alone.
pub fn url_jpg_to_png(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(mut url) => {
            let path = jpg_to_png(url.path());
            url.set_path(&path);
            url.to_string()
        }
        Err(_) => jpg_to_png(url_str),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            get_filename_from_url("https://i.pximg.net/img-original/img/1/2/3_p0.jpg"),
            "3_p0.jpg"
        );
        assert!(get_filename_from_url("https://i.pximg.net/").starts_with("download_"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a b/c.jpg"), "a_b_c.jpg");
        assert_eq!(sanitize_filename("123_p0.png"), "123_p0.png");
    }

    #[test]
    fn test_jpg_detection_ignores_query() {
        assert!(has_jpg_extension("https://x.test/a/1_p0.jpg"));
        assert!(has_jpg_extension("https://x.test/a/1_p0.jpg?v=2"));
        assert!(!has_jpg_extension("https://x.test/a/1_p0.gif"));
        assert!(!has_jpg_extension("https://x.test/a/1_p0.jpeg"));
    }

    #[test]
    fn test_jpg_to_png() {
        assert_eq!(jpg_to_png("1_p0.jpg"), "1_p0.png");
        assert_eq!(jpg_to_png("1_p0.gif"), "1_p0.gif");
        assert_eq!(url_jpg_to_png("https://x.test/a/1_p0.jpg?v=2"), "https://x.test/a/1_p0.png?v=2");
    }
}
