use std::fmt::Write;

use thiserror::Error;

use crate::intercept::form::Form;
use crate::store::Team;

/// Hidden form field a participant's browser submits when they agreed to
/// answer the survey. Absent means declined: no validation, no metadata.
pub const CARRIER_FIELD: &str = "extra-fields";
pub const CARRIER_AGREED: &str = "ok";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurveyError {
    #[error("Field \"{0}\" cannot be empty")]
    EmptyField(String),
    #[error("Invalid value for field \"{0}\"")]
    InvalidValue(String),
}

/// A single survey question rendered as a `<select>`.
#[derive(Debug, Clone)]
pub struct Selector {
    label: String,
    name: String,
    options: Vec<String>,
}

impl Selector {
    pub fn new(label: &str, name: &str, options: Vec<String>) -> Self {
        Self {
            label: label.to_owned(),
            name: name.to_owned(),
            options,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// One synthetic blank default option, then one option per value.
    pub fn html(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "<label>{label}</label><select name=\"{name}\">",
            label = escape(&self.label),
            name = escape(&self.name),
        );
        out.push_str("<option value=\"\"></option>");

        for opt in &self.options {
            let opt = escape(opt);
            let _ = write!(out, "<option value=\"{opt}\">{opt}</option>");
        }

        out.push_str("</select>");
        out
    }

    /// Validates the submitted field and stores it on the team.
    pub fn read_metadata(&self, form: &Form, team: &Team) -> Result<(), SurveyError> {
        let value = form.get(&self.name).unwrap_or_default();
        if value.is_empty() {
            return Err(SurveyError::EmptyField(self.label.clone()));
        }

        if !self.options.iter().any(|o| o == &value) {
            return Err(SurveyError::InvalidValue(self.label.clone()));
        }

        team.set_metadata(&self.name, &value);

        Ok(())
    }
}

/// Extra registration questions: a title plus a rows-by-columns layout of
/// selectors, with the opt-in carrier field.
#[derive(Debug, Clone)]
pub struct ExtraFields {
    title: String,
    rows: Vec<Vec<Selector>>,
}

impl ExtraFields {
    pub fn new(title: &str, rows: Vec<Vec<Selector>>) -> Self {
        Self {
            title: title.to_owned(),
            rows,
        }
    }

    /// Selectors in row-major order, the order validation runs in.
    pub fn selectors(&self) -> impl Iterator<Item = &Selector> {
        self.rows.iter().flatten()
    }

    pub fn agreed(&self, form: &Form) -> bool {
        form.get(CARRIER_FIELD).as_deref() == Some(CARRIER_AGREED)
    }

    pub fn html(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "<div class=\"extra-fields\"><h3>{title}</h3>",
            title = escape(&self.title)
        );

        for row in &self.rows {
            out.push_str("<div class=\"row\">");
            for selector in row {
                out.push_str(&selector.html());
            }
            out.push_str("</div>");
        }

        let _ = write!(
            out,
            "<input type=\"hidden\" name=\"{CARRIER_FIELD}\" value=\"{CARRIER_AGREED}\"></div>"
        );

        out
    }
}

pub(crate) fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }

    out
}
