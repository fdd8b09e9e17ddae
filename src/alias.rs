//! Redirect pages for the `aliases` a page declares in its front matter.

use crate::output_path::{normalize_url, PathError, Result, INDEX_FILE};

/// The output path for an alias. Aliases are normalized like explicit URLs;
/// one whose last segment has no extension is treated as a directory, so
/// `old/post` becomes `old/post/index.html`. An alias for the site root is
/// rejected with [`PathError::Empty`].
pub fn alias_path(alias: &str) -> Result<String> {
    let path = normalize_url(alias)?;
    if path == INDEX_FILE && !alias.trim_end_matches('/').ends_with(INDEX_FILE) {
        return Err(PathError::Empty(alias.to_owned()));
    }
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.contains('.') {
        true => Ok(path),
        false => Ok(format!("{}/{}", path, INDEX_FILE)),
    }
}

/// A minimal HTML document redirecting to `permalink`.
pub fn redirect_document(permalink: &str) -> String {
    let target = html_escape::encode_double_quoted_attribute(permalink);
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n\
         <title>{target}</title>\n\
         <link rel=\"canonical\" href=\"{target}\">\n\
         <meta charset=\"utf-8\">\n\
         <meta http-equiv=\"refresh\" content=\"0; url={target}\">\n\
         </head>\n</html>\n",
        target = target
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_alias_path() -> Result<()> {
        assert_eq!("old/post/index.html", alias_path("/old/post")?);
        assert_eq!("old/post/index.html", alias_path("/old/post/")?);
        assert_eq!("old/post.html", alias_path("old/post.html")?);
        assert_eq!("index.html", alias_path("/index.html")?);
        Ok(())
    }

    #[test]
    fn test_alias_path_errors() {
        assert!(matches!(alias_path("../x"), Err(PathError::Traversal(_))));
        assert!(matches!(alias_path("//"), Err(PathError::Empty(_))));
        assert!(matches!(alias_path("/"), Err(PathError::Empty(_))));
        assert!(matches!(alias_path("./"), Err(PathError::Empty(_))));
    }

    #[test]
    fn test_redirect_document() {
        let html = redirect_document("http://auth/bub/a.html?x=\"1\"");
        assert!(html.contains("href=\"http://auth/bub/a.html?x=&quot;1&quot;\""));
        assert!(html.contains("content=\"0; url=http://auth/bub/a.html?x=&quot;1&quot;\""));
        assert!(html.starts_with("<!DOCTYPE html>"));
    }
}
