//! Tab-completion providers
//!
//! A completer receives the shell it runs in, the arguments parsed so far and
//! the prefix under the cursor, and returns candidate strings. Providers are
//! stateless and keep nothing in process-wide stream state.

use std::path::Path;
use std::sync::LazyLock;

use walkdir::WalkDir;

/// Completion provider for a shell of type `S`
pub trait Completer<S: ?Sized> {
    fn complete(&self, shell: &S, args: &[String], prefix: &str) -> Vec<String>;
}

impl<S: ?Sized, F> Completer<S> for F
where
    F: Fn(&S, &[String], &str) -> Vec<String>,
{
    fn complete(&self, shell: &S, args: &[String], prefix: &str) -> Vec<String> {
        self(shell, args, prefix)
    }
}

// ============================================================================
// Choice Completer
// ============================================================================

/// Completes from a fixed list of choices
#[derive(Debug, Clone)]
pub struct ChoiceCompleter {
    choices: Vec<String>,
    case_sensitive: bool,
}

/// Tab complete from a list of choices
pub fn choice_completer<I, T>(choices: I, case_sensitive: bool) -> ChoiceCompleter
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    ChoiceCompleter {
        choices: choices.into_iter().map(Into::into).collect(),
        case_sensitive,
    }
}

impl<S: ?Sized> Completer<S> for ChoiceCompleter {
    fn complete(&self, _shell: &S, _args: &[String], prefix: &str) -> Vec<String> {
        if self.case_sensitive {
            return self
                .choices
                .iter()
                .filter(|choice| choice.starts_with(prefix))
                .cloned()
                .collect();
        }
        let prefix = prefix.to_lowercase();
        self.choices
            .iter()
            .filter(|choice| choice.to_lowercase().starts_with(&prefix))
            .cloned()
            .collect()
    }
}

// ============================================================================
// Path Completer
// ============================================================================

/// Signature of an OS-specific path completion function
pub type PathCompleteFn = fn(&str) -> Vec<String>;

static PATH_COMPLETE: LazyLock<PathCompleteFn> = LazyLock::new(|| {
    let selected: PathCompleteFn = if cfg!(windows) {
        windows_path_completer
    } else {
        unix_path_completer
    };
    selected
});

/// Completes filesystem paths with the function chosen for the host OS
#[derive(Debug, Clone, Copy)]
pub struct PathCompleter {
    complete: PathCompleteFn,
}

/// The path completer for this platform, selected once per process
pub fn path_completer() -> PathCompleter {
    PathCompleter {
        complete: *PATH_COMPLETE,
    }
}

impl<S: ?Sized> Completer<S> for PathCompleter {
    fn complete(&self, _shell: &S, _args: &[String], prefix: &str) -> Vec<String> {
        (self.complete)(prefix)
    }
}

/// Path completion with `/` separators
pub fn unix_path_completer(prefix: &str) -> Vec<String> {
    complete_path(prefix, &['/'], '/')
}

/// Path completion with `\` separators; `/` is accepted in the prefix
pub fn windows_path_completer(prefix: &str) -> Vec<String> {
    complete_path(prefix, &['\\', '/'], '\\')
}

/// Entries of the prefix's directory whose names start with its last component
///
/// Candidates keep the directory part of the prefix; directories end with
/// `separator`.
fn complete_path(prefix: &str, separators: &[char], separator: char) -> Vec<String> {
    let (dir, partial) = match prefix.rfind(separators) {
        Some(index) => prefix.split_at(index + 1),
        None => ("", prefix),
    };
    let search_root = if dir.is_empty() {
        Path::new(".")
    } else {
        Path::new(dir)
    };

    let mut candidates: Vec<String> = WalkDir::new(search_root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            if !name.starts_with(partial) {
                return None;
            }
            let mut candidate = format!("{dir}{name}");
            if entry.file_type().is_dir() {
                candidate.push(separator);
            }
            Some(candidate)
        })
        .collect();
    candidates.sort();
    candidates
}

// ============================================================================
// Tests
// ============================================================================
