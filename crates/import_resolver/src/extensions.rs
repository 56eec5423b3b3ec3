//! Extension probe order: the configured extension list, reordered so a
//! fully-specified request (empty suffix) and the parent file's own
//! extension are tried first.

/// Builds the probe order for a single resolution: the empty string first
/// (so requests that already name a real file resolve without appending
/// anything), then the parent's extension if it's one of the configured
/// ones, then the remaining configured extensions in their original order.
pub fn extension_probe_order(configured: &[String], parent_ext: Option<&str>) -> Vec<String> {
    let mut ordered = Vec::with_capacity(configured.len() + 1);
    ordered.push(String::new());

    if let Some(ext) = parent_ext {
        if configured.iter().any(|e| e == ext) {
            ordered.push(ext.to_owned());
        }
    }

    for ext in configured {
        if Some(ext.as_str()) != parent_ext {
            ordered.push(ext.clone());
        }
    }

    ordered
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prepends_empty_string() {
        let exts = vec![".js".to_owned(), ".json".to_owned()];
        assert_eq!(
            extension_probe_order(&exts, None),
            vec!["".to_owned(), ".js".to_owned(), ".json".to_owned()]
        );
    }

    #[test]
    fn moves_parent_extension_to_front() {
        let exts = vec![".js".to_owned(), ".json".to_owned(), ".wxss".to_owned()];
        assert_eq!(
            extension_probe_order(&exts, Some(".json")),
            vec![
                "".to_owned(),
                ".json".to_owned(),
                ".js".to_owned(),
                ".wxss".to_owned()
            ]
        );
    }

    #[test]
    fn ignores_unconfigured_parent_extension() {
        let exts = vec![".js".to_owned()];
        assert_eq!(
            extension_probe_order(&exts, Some(".ts")),
            vec!["".to_owned(), ".js".to_owned()]
        );
    }
}
