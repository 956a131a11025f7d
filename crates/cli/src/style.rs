//! Terminal styling for the few lines dbsync prints.

use console::Style;

use dbsync_core::SyncDirection;

/// Green check mark followed by `msg`.
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Red cross followed by `msg`.
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Yellow warning sign followed by `msg`.
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Arrow label for a direction, e.g. `local → remote`.
pub fn direction(direction: SyncDirection) -> String {
    let (text, style) = match direction {
        SyncDirection::LocalToRemote => ("local → remote", Style::new().blue().bold()),
        SyncDirection::RemoteToLocal => ("remote → local", Style::new().green().bold()),
        SyncDirection::SmartSync => ("remote ⇢ local, local → remote", Style::new().cyan().bold()),
        SyncDirection::Both => ("local ⇄ remote", Style::new().magenta().bold()),
    };
    style.apply_to(text).to_string()
}
