//! Prompt text sent to the model for every consultation.

use crate::models::Visit;

/// Fixed system instruction describing the three sections the model must produce.
pub const SYSTEM_PROMPT: &str = "
You are provided with notes written by a doctor from a patient's visit.
Your job is to summarize the visit for the doctor and provide an email.
Reply with exactly three sections with the headings:
### Summary of visit for the doctor's records
### Next steps for the doctor
### Draft of email to patient in patient-friendly language
";

/// Render the per-visit user message. Field values are inserted verbatim.
pub fn user_prompt_for(visit: &Visit) -> String {
    format!(
        "Create the summary, next steps and draft email for:\n\
         Patient Name: {}\n\
         Date of Visit: {}\n\
         Notes: {}",
        visit.patient_name, visit.date_of_visit, visit.notes
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit(patient_name: &str, date_of_visit: &str, notes: &str) -> Visit {
        Visit {
            patient_name: patient_name.to_string(),
            date_of_visit: date_of_visit.to_string(),
            notes: notes.to_string(),
        }
    }

    #[test]
    fn renders_fixed_template() {
        let prompt = user_prompt_for(&visit("Jane Doe", "2024-03-01", "BP 150/95."));

        assert_eq!(
            prompt,
            "Create the summary, next steps and draft email for:\n\
             Patient Name: Jane Doe\n\
             Date of Visit: 2024-03-01\n\
             Notes: BP 150/95."
        );
    }

    #[test]
    fn values_are_not_escaped() {
        let notes = "Line one\n<b>\"quoted\"</b> & {braces} \\n";
        let prompt = user_prompt_for(&visit("O'Brien", "01/02/2024", notes));

        assert!(prompt.contains("Patient Name: O'Brien\n"));
        assert!(prompt.contains("Date of Visit: 01/02/2024\n"));
        assert!(prompt.ends_with(&format!("Notes: {}", notes)));
    }

    #[test]
    fn system_prompt_names_all_sections() {
        for heading in [
            "### Summary of visit for the doctor's records",
            "### Next steps for the doctor",
            "### Draft of email to patient in patient-friendly language",
        ] {
            assert!(SYSTEM_PROMPT.contains(heading));
        }
    }
}
