//! Utility functions and helpers.

/// Near-miss suggestions for not-found errors.
pub mod mistake_detection;

/// Memorable agent name generation.
pub mod names;

/// Gitignore-style pattern overlap for reservation conflicts.
pub mod pathspec;

/// Input validation with actionable suggestions.
pub mod validation;

/// Converts text to a URL-safe slug.
///
/// # Examples
///
/// ```
/// use relay_core::utils::slugify;
///
/// assert_eq!(slugify("Hello World"), "hello-world");
/// assert_eq!(slugify("/home/user/backend"), "home-user-backend");
/// ```
pub fn slugify(text: &str) -> String {
    slug::slugify(text)
}

/// Slug used in archive filenames for a message subject. Falls back to
/// "message" for subjects that slugify to nothing.
pub fn subject_slug(subject: &str) -> String {
    let s = slug::slugify(subject);
    if s.is_empty() { "message".to_string() } else { s }
}
