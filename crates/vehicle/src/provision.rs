//! First-run identity provisioning

use std::io::{BufRead, Write};

use tracing::{info, warn};

use crate::{EmergencyContacts, VehicleError, VehicleField, VehicleInfo, VehicleStore};

/// Prompt for every missing field of `info`
///
/// An empty answer for a required field is a configuration error. An empty
/// secondary contact is accepted with a warning.
pub fn provision<R: BufRead, W: Write>(
    mut info: VehicleInfo,
    input: &mut R,
    output: &mut W,
) -> Result<VehicleInfo, VehicleError> {
    for field in info.missing_fields() {
        info!(target: "vehicle", "No {} set, asking the user", field.key());
        match field {
            VehicleField::ChassisId => {
                info.chassis_id = required(input, output, "Enter chassis id: ", "Chassis id")?
            }
            VehicleField::Model => {
                info.model = required(input, output, "Enter car model: ", "Car model")?
            }
            VehicleField::Owner => {
                info.owner = required(input, output, "Enter car owner: ", "Car owner")?
            }
            VehicleField::Emergency => {
                let primary = required(
                    input,
                    output,
                    "Enter primary emergency contact: ",
                    "Primary contact",
                )?;
                let secondary = ask(input, output, "Enter secondary emergency contact: ")?;
                if secondary.is_empty() {
                    warn!(target: "vehicle", "Secondary contact left empty, it is optional");
                }
                info.emergency = EmergencyContacts::new(primary, Some(secondary));
            }
        }
    }

    Ok(info)
}

/// Load the identity, provision missing fields and persist the result
pub fn ensure_provisioned<R: BufRead, W: Write>(
    store: &VehicleStore,
    input: &mut R,
    output: &mut W,
) -> Result<VehicleInfo, VehicleError> {
    let stored = store.load()?;
    if stored.is_complete() {
        return Ok(stored);
    }

    let info = provision(stored, input, output)?;
    store.save(&info)?;

    info!(target: "vehicle", vehicle = ?info, "Vehicle identity set");
    Ok(info)
}

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, prompt: &str) -> Result<String, VehicleError> {
    output.write_all(prompt.as_bytes())?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

fn required<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    prompt: &str,
    label: &str,
) -> Result<String, VehicleError> {
    let answer = ask(input, output, prompt)?;
    if answer.is_empty() {
        return Err(VehicleError::Configuration(format!("{} can't be empty", label)));
    }
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_prompts_only_missing_fields() {
        let partial = VehicleInfo {
            chassis_id: "JT123".to_string(),
            model: "Corolla".to_string(),
            ..Default::default()
        };
        let mut input = Cursor::new("Mona\n0100\n\n");
        let mut output = Vec::new();

        let info = provision(partial, &mut input, &mut output).unwrap();

        assert_eq!(info.owner, "Mona");
        assert_eq!(info.emergency, EmergencyContacts::new("0100", None));
        let prompts = String::from_utf8(output).unwrap();
        assert!(!prompts.contains("chassis"));
        assert!(prompts.contains("Enter car owner: "));
    }

    #[test]
    fn test_empty_required_answer_fails() {
        let mut input = Cursor::new("\n");
        let mut output = Vec::new();

        let result = provision(VehicleInfo::default(), &mut input, &mut output);
        assert!(matches!(result, Err(VehicleError::Configuration(_))));
    }

    #[test]
    fn test_ensure_provisioned_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = VehicleStore::new(dir.path().join("config.csv"));
        let mut input = Cursor::new("JT123\nCorolla\nMona\n0100\n0122\n");
        let mut output = Vec::new();

        let info = ensure_provisioned(&store, &mut input, &mut output).unwrap();
        assert_eq!(store.load().unwrap(), info);

        // Complete identity: nothing is asked
        let mut silent = Vec::new();
        ensure_provisioned(&store, &mut Cursor::new(""), &mut silent).unwrap();
        assert!(silent.is_empty());
    }
}
