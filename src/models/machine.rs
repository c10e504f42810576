use serde::Serialize;

/// Prefix of machine ids created for manually entered exercises.
pub const MANUAL_PREFIX: &str = "manual-";

/// The machine type recorded for manual entries.
pub const MANUAL_MACHINE_TYPE: &str = "manual";

/// Builds the machine id for a manually entered exercise.
///
/// `"Bench Press"` becomes `"manual-bench-press"`.
pub fn manual_machine_id(exercise_name: &str) -> String {
    let slug = exercise_name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-");

    format!("{}{}", MANUAL_PREFIX, slug)
}

/// Recovers a readable exercise name from a manual machine id.
pub fn manual_exercise_name(machine_id: &str) -> Option<String> {
    let slug = machine_id.strip_prefix(MANUAL_PREFIX)?;

    let name = slug
        .split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    (!name.is_empty()).then_some(name)
}

/// Machines installed in the gym whose tags may not carry a name.
const KNOWN_MACHINES: [(&str, &str, &str); 4] = [
    ("machine-001", "cable_stack", "Lat Pulldown"),
    ("machine-002", "cable_stack", "Cable Row"),
    ("machine-003", "cable_stack", "Chest Press"),
    ("machine-004", "cable_stack", "Leg Press"),
];

/// What the app shows about a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineInfo {
    pub machine_id: String,
    pub machine_type: Option<String>,
    pub machine_name: String,
}

/// Looks a machine up by id.
///
/// # Arguments
///
/// * `machine_id` - The machine identifier.
/// * `stored_name` - A name recorded with the machine's exercises, if any.
///
/// # Returns
///
/// The `MachineInfo`, or `None` for an unknown tag machine with no stored name.
pub fn machine_info(machine_id: &str, stored_name: Option<&str>) -> Option<MachineInfo> {
    let stored_name = stored_name.map(str::trim).filter(|name| !name.is_empty());

    if let Some((_, machine_type, name)) = KNOWN_MACHINES.iter().find(|(id, _, _)| *id == machine_id) {
        return Some(MachineInfo {
            machine_id: machine_id.to_string(),
            machine_type: Some(machine_type.to_string()),
            machine_name: stored_name.unwrap_or(*name).to_string(),
        });
    }

    if machine_id.starts_with(MANUAL_PREFIX) {
        return stored_name
            .map(str::to_string)
            .or_else(|| manual_exercise_name(machine_id))
            .map(|machine_name| MachineInfo {
                machine_id: machine_id.to_string(),
                machine_type: Some(MANUAL_MACHINE_TYPE.to_string()),
                machine_name,
            });
    }

    stored_name.map(|name| MachineInfo {
        machine_id: machine_id.to_string(),
        machine_type: None,
        machine_name: name.to_string(),
    })
}

/// The name shown for a machine in history views.
pub fn display_name(machine_id: &str, stored_name: Option<&str>) -> String {
    machine_info(machine_id, stored_name)
        .map(|info| info.machine_name)
        .unwrap_or_else(|| machine_id.to_string())
}
