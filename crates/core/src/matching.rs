//! Correlating observed windows with pending launch records.
//!
//! Window identity on the desktop is imperfect: all we get is the owning process, its
//! image path and, for packaged apps, the application user model id. Matching is a
//! pure function over the current status entries so it can be exercised without an OS.

use crate::status::{AppId, LaunchStatusEntry, LaunchingState};
use crate::WindowHandle;

/// A newly observed window and what is known about its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCandidate {
    pub window: WindowHandle,
    pub process_id: u32,
    /// Full image path of the owning process, when it could be queried.
    pub executable_path: Option<String>,
    /// Package identity of the owning process, for packaged apps.
    pub app_user_model_id: Option<String>,
}

/// Pick the entry a window belongs to.
///
/// Only pending entries without a window are eligible. An entry whose spawned
/// process owns the window wins outright; otherwise the earliest eligible entry with
/// the same package identity or executable path (case-insensitive) is chosen, so
/// duplicate launches of one executable are filled first-in first-out.
pub fn find_match(candidate: &MatchCandidate, entries: &[LaunchStatusEntry]) -> Option<AppId> {
    let mut eligible = entries
        .iter()
        .filter(|e| e.state.is_pending() && e.window.is_none());

    if let Some(entry) = eligible
        .clone()
        .find(|e| e.process_id == Some(candidate.process_id))
    {
        return Some(entry.id);
    }

    eligible
        .find(|e| identity_matches(candidate, e))
        .map(|e| e.id)
}

/// Pick the `Launched` entry whose spawned process owns the window, if any.
pub fn find_process_match(candidate: &MatchCandidate, entries: &[LaunchStatusEntry]) -> Option<AppId> {
    entries
        .iter()
        .find(|e| {
            e.state == LaunchingState::Launched
                && e.window.is_none()
                && e.process_id == Some(candidate.process_id)
        })
        .map(|e| e.id)
}

fn identity_matches(candidate: &MatchCandidate, entry: &LaunchStatusEntry) -> bool {
    if let (Some(expected), Some(actual)) = (
        entry.app.package_identity.as_deref(),
        candidate.app_user_model_id.as_deref(),
    ) {
        if expected.eq_ignore_ascii_case(actual) {
            return true;
        }
    }
    match candidate.executable_path.as_deref() {
        Some(actual) => same_path(&entry.app.executable_path, actual),
        None => false,
    }
}

/// Compare two Windows paths ignoring case and separator style.
pub fn same_path(a: &str, b: &str) -> bool {
    let normalize = |p: &str| {
        p.trim()
            .trim_matches('"')
            .replace('/', "\\")
            .to_lowercase()
    };
    !a.trim().is_empty() && normalize(a) == normalize(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{LaunchingState, LaunchingStatus};
    use crate::workspace::fixtures::{app, workspace};

    fn candidate(window: WindowHandle, pid: u32, path: &str) -> MatchCandidate {
        MatchCandidate {
            window,
            process_id: pid,
            executable_path: Some(path.to_string()),
            app_user_model_id: None,
        }
    }

    fn entries(apps: Vec<crate::ApplicationRecord>) -> Vec<LaunchStatusEntry> {
        LaunchingStatus::new(&workspace(apps)).get()
    }

    #[test]
    fn test_unrelated_window_is_ignored() {
        let es = entries(vec![app("Editor", r"C:\Apps\editor.exe")]);
        assert_eq!(find_match(&candidate(1, 9, r"C:\Windows\explorer.exe"), &es), None);
    }

    #[test]
    fn test_path_comparison_ignores_case_and_separators() {
        let es = entries(vec![app("Editor", r"C:\Program Files\Editor\editor.exe")]);
        let c = candidate(1, 9, "c:/program files/editor/EDITOR.EXE");
        assert_eq!(find_match(&c, &es), Some(0));
    }

    #[test]
    fn test_duplicate_executable_matches_fifo() {
        let es = entries(vec![
            app("Other", r"C:\Apps\other.exe"),
            app("First", r"C:\Apps\term.exe"),
            app("Second", r"C:\Apps\term.exe"),
        ]);
        assert_eq!(find_match(&candidate(1, 5, r"C:\Apps\term.exe"), &es), Some(1));
    }

    #[test]
    fn test_claimed_and_terminal_entries_are_skipped() {
        let mut es = entries(vec![
            app("A", r"C:\Apps\term.exe"),
            app("B", r"C:\Apps\term.exe"),
            app("C", r"C:\Apps\term.exe"),
        ]);
        es[0].window = Some(77);
        es[1].state = LaunchingState::Failed;
        assert_eq!(find_match(&candidate(1, 5, r"C:\Apps\term.exe"), &es), Some(2));

        es[2].state = LaunchingState::LaunchedAndMoved;
        assert_eq!(find_match(&candidate(1, 5, r"C:\Apps\term.exe"), &es), None);
    }

    #[test]
    fn test_process_id_takes_precedence_over_order() {
        let mut es = entries(vec![app("A", r"C:\Apps\term.exe"), app("B", r"C:\Apps\term.exe")]);
        es[0].state = LaunchingState::Launched;
        es[0].process_id = Some(100);
        es[1].state = LaunchingState::Launched;
        es[1].process_id = Some(200);
        assert_eq!(find_match(&candidate(1, 200, r"C:\Apps\term.exe"), &es), Some(1));
    }

    #[test]
    fn test_process_match_ignores_identity() {
        let mut es = entries(vec![app("A", r"C:\Apps\term.exe"), app("B", r"C:\Apps\term.exe")]);
        assert_eq!(find_process_match(&candidate(1, 300, r"C:\Apps\term.exe"), &es), None);

        es[1].state = LaunchingState::Launched;
        es[1].process_id = Some(300);
        assert_eq!(find_process_match(&candidate(1, 300, r"C:\Other\x.exe"), &es), Some(1));

        es[1].window = Some(5);
        assert_eq!(find_process_match(&candidate(1, 300, r"C:\Apps\term.exe"), &es), None);
    }

    #[test]
    fn test_package_identity_match_without_path() {
        let mut calc = app("Calculator", r"C:\Program Files\WindowsApps\calc.exe");
        calc.package_identity = Some("Microsoft.WindowsCalculator_8wekyb3d8bbwe!App".into());
        let es = entries(vec![calc]);
        let c = MatchCandidate {
            window: 1,
            process_id: 3,
            executable_path: None,
            app_user_model_id: Some("microsoft.windowscalculator_8wekyb3d8bbwe!app".into()),
        };
        assert_eq!(find_match(&c, &es), Some(0));
    }

    #[test]
    fn test_unknown_owner_never_matches() {
        let es = entries(vec![app("A", r"C:\Apps\a.exe")]);
        let c = MatchCandidate {
            window: 1,
            process_id: 3,
            executable_path: None,
            app_user_model_id: None,
        };
        assert_eq!(find_match(&c, &es), None);
    }
}
