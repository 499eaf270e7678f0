//! Camera identities.
//!
//! A [`CameraName`] names either one physical camera or a switchable group.
//! Group names are always flat: nesting a group inside another group
//! contributes its members, never the group itself, and duplicates are
//! dropped while keeping first-seen order.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::backend::{CameraCharacteristics, CameraManager, Deadline};
use crate::continuation::Continuation;

/// Identity of a physical camera or a switchable group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CameraName {
    /// A USB webcam, identified by its serial number.
    Webcam { serial_number: String },
    /// A camera built into the host, identified by a platform id.
    Builtin { id: String },
    /// An ordered, de-duplicated set of concrete cameras.
    Switchable(SwitchableName),
    /// Placeholder for "no camera".
    Unknown,
}

/// Member list of a switchable identity. Only constructible flattened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwitchableName {
    members: Vec<CameraName>,
}

impl SwitchableName {
    pub fn members(&self) -> &[CameraName] {
        &self.members
    }
}

impl CameraName {
    pub fn webcam(serial_number: impl Into<String>) -> Self {
        CameraName::Webcam {
            serial_number: serial_number.into(),
        }
    }

    pub fn builtin(id: impl Into<String>) -> Self {
        CameraName::Builtin { id: id.into() }
    }

    /// Build a switchable identity from any mix of concrete and switchable
    /// names.
    pub fn switchable<I>(names: I) -> Self
    where
        I: IntoIterator<Item = CameraName>,
    {
        let mut members = Vec::new();
        for name in names {
            flatten_into(&name, &mut members);
        }
        CameraName::Switchable(SwitchableName { members })
    }

    pub fn is_switchable(&self) -> bool {
        matches!(self, CameraName::Switchable(_))
    }

    pub fn is_webcam(&self) -> bool {
        matches!(self, CameraName::Webcam { .. })
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, CameraName::Unknown)
    }

    pub fn serial_number(&self) -> Option<&str> {
        match self {
            CameraName::Webcam { serial_number } => Some(serial_number),
            _ => None,
        }
    }

    /// The concrete cameras behind this name: itself for a concrete name,
    /// the flattened members for a group, nothing for `Unknown`.
    pub fn members(&self) -> Vec<CameraName> {
        match self {
            CameraName::Switchable(group) => group.members.clone(),
            CameraName::Unknown => Vec::new(),
            other => vec![other.clone()],
        }
    }

    /// Short label safe for thread names.
    pub fn label(&self) -> String {
        let raw = match self {
            CameraName::Webcam { serial_number } => serial_number.clone(),
            CameraName::Builtin { id } => id.clone(),
            CameraName::Switchable(group) => format!("switch{}", group.members.len()),
            CameraName::Unknown => "unknown".to_string(),
        };
        raw.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .take(24)
            .collect()
    }
}

fn flatten_into(name: &CameraName, out: &mut Vec<CameraName>) {
    match name {
        CameraName::Switchable(group) => {
            for member in &group.members {
                flatten_into(member, out);
            }
        }
        CameraName::Unknown => {}
        concrete => {
            if !out.contains(concrete) {
                out.push(concrete.clone());
            }
        }
    }
}

impl fmt::Display for CameraName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraName::Webcam { serial_number } => write!(f, "Webcam({})", serial_number),
            CameraName::Builtin { id } => write!(f, "Builtin({})", id),
            CameraName::Switchable(group) => {
                write!(f, "Switchable[")?;
                for (i, member) in group.members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", member)?;
                }
                write!(f, "]")
            }
            CameraName::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Capabilities usable on every member of `name`.
///
/// For a concrete name this is the camera's own characteristics. For a group
/// it is the intersection of the members' stream modes, in the order the
/// first member lists them. Returns `None` if any member is unknown to the
/// manager.
pub fn projected_characteristics(
    manager: &dyn CameraManager,
    name: &CameraName,
) -> Option<CameraCharacteristics> {
    let mut members = name.members().into_iter();
    let first = manager.characteristics(&members.next()?)?;
    members.try_fold(first, |acc, member| {
        let other = manager.characteristics(&member)?;
        Some(acc.intersect(&other))
    })
}

/// Receives the outcome of a permission request.
pub trait PermissionCallback: Send + Sync {
    fn on_permission_result(&self, name: &CameraName, granted: bool);
}

struct PermissionTally {
    remaining: usize,
    reported: bool,
}

/// Ask for permission to use every concrete camera behind `name`.
///
/// Requests go out to all members at once. The callback fires exactly once:
/// with `true` after every member granted, or with `false` on the first
/// refusal.
pub fn request_permission(
    manager: &dyn CameraManager,
    name: &CameraName,
    deadline: Deadline,
    callback: Continuation<dyn PermissionCallback>,
) {
    let members = name.members();
    if members.is_empty() {
        let name = name.clone();
        callback.dispatch(move |cb| cb.on_permission_result(&name, false));
        return;
    }

    let tally = Arc::new(Mutex::new(PermissionTally {
        remaining: members.len(),
        reported: false,
    }));

    for member in members {
        let tally = Arc::clone(&tally);
        let callback = callback.clone();
        let requested = name.clone();
        let who = member.clone();
        manager.request_permission(
            &member,
            deadline,
            Box::new(move |granted| {
                let outcome = {
                    let mut tally = match tally.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    if tally.reported {
                        None
                    } else if !granted {
                        tally.reported = true;
                        Some(false)
                    } else {
                        tally.remaining -= 1;
                        if tally.remaining == 0 {
                            tally.reported = true;
                            Some(true)
                        } else {
                            None
                        }
                    }
                };
                if !granted {
                    log::info!("Permission denied for {}", who);
                }
                if let Some(granted) = outcome {
                    callback.dispatch(move |cb| cb.on_permission_result(&requested, granted));
                }
            }),
        );
    }
}
