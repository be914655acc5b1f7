pub mod error;
pub mod platform;
pub mod process;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Expand a leading `~/` to the caller's home directory.
///
/// Paths without the prefix are returned unchanged. Fails when the home
/// directory cannot be determined, rather than silently leaving `~` in place.
pub fn expand_tilde(path: &str) -> Result<std::path::PathBuf> {
    use crate::platform::{CurrentPlatform, Platform};

    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = CurrentPlatform::home_dir().ok_or(Error::NoHomeDir)?;
            Ok(home.join(rest))
        }
        None => Ok(std::path::PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_tilde_with_home() {
        let expanded = expand_tilde("~/.ssh/config").unwrap();
        assert!(expanded.is_absolute(), "should be absolute: {}", expanded.display());
        assert!(expanded.ends_with(".ssh/config"));
    }

    #[test]
    fn expand_tilde_bare_home() {
        let expanded = expand_tilde("~/").unwrap();
        assert_eq!(Some(expanded), dirs::home_dir());
    }

    #[test]
    fn expand_tilde_leaves_other_paths() {
        assert_eq!(expand_tilde("/abs/path").unwrap(), std::path::PathBuf::from("/abs/path"));
        assert_eq!(expand_tilde("rel/~/x").unwrap(), std::path::PathBuf::from("rel/~/x"));
    }
}
