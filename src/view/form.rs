use crate::model::CommandRecord;

pub const EMPTY_FIELD_ERROR: &str = "Should not be empty";
pub const FORM_INCOMPLETE: &str = "Fill all the fields";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Path,
    Cmd,
}

impl Field {
    /// Display order of the add form.
    pub const ALL: [Field; 3] = [Field::Name, Field::Path, Field::Cmd];

    pub fn label(self) -> &'static str {
        match self {
            Field::Name => "Name",
            Field::Path => "Path",
            Field::Cmd => "Command",
        }
    }

    pub fn next(self) -> Field {
        match self {
            Field::Name => Field::Path,
            Field::Path => Field::Cmd,
            Field::Cmd => Field::Name,
        }
    }

    pub fn prev(self) -> Field {
        match self {
            Field::Name => Field::Cmd,
            Field::Path => Field::Name,
            Field::Cmd => Field::Path,
        }
    }

    fn index(self) -> usize {
        match self {
            Field::Name => 0,
            Field::Path => 1,
            Field::Cmd => 2,
        }
    }
}

fn validate(value: &str) -> Option<&'static str> {
    if value.trim().is_empty() {
        Some(EMPTY_FIELD_ERROR)
    } else {
        None
    }
}

/// The add-command form: values, field errors and touched flags.
#[derive(Debug, Clone, Default)]
pub struct CommandForm {
    values: [String; 3],
    errors: [Option<&'static str>; 3],
    touched: [bool; 3],
}

impl CommandForm {
    pub fn value(&self, field: Field) -> &str {
        &self.values[field.index()]
    }

    /// Replace a field's value and re-validate it.
    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let i = field.index();
        self.values[i] = value.into();
        self.errors[i] = validate(&self.values[i]);
    }

    pub fn push_char(&mut self, field: Field, c: char) {
        let mut v = self.value(field).to_string();
        v.push(c);
        self.set(field, v);
    }

    pub fn backspace(&mut self, field: Field) {
        let mut v = self.value(field).to_string();
        v.pop();
        self.set(field, v);
    }

    /// Leaving a field marks it touched and validates it.
    pub fn blur(&mut self, field: Field) {
        let i = field.index();
        self.touched[i] = true;
        self.errors[i] = validate(&self.values[i]);
    }

    /// The error to show for a field; hidden until the field is touched.
    pub fn error(&self, field: Field) -> Option<&'static str> {
        let i = field.index();
        if self.touched[i] {
            self.errors[i]
        } else {
            None
        }
    }

    /// Touch and validate every field. Returns true when all pass.
    pub fn validate_all(&mut self) -> bool {
        for field in Field::ALL {
            self.blur(field);
        }
        self.errors.iter().all(Option::is_none)
    }

    /// Field errors in display order, for non-interactive reporting.
    pub fn errors(&self) -> Vec<(Field, &'static str)> {
        Field::ALL
            .into_iter()
            .filter_map(|f| self.error(f).map(|e| (f, e)))
            .collect()
    }

    /// A fresh, unsaved record from the current values.
    pub fn to_record(&self) -> CommandRecord {
        CommandRecord::new(
            self.value(Field::Name).trim(),
            self.value(Field::Cmd).trim(),
            self.value(Field::Path).trim(),
        )
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_hidden_until_touched() {
        let mut f = CommandForm::default();
        f.set(Field::Name, "");
        assert_eq!(f.error(Field::Name), None);
        f.blur(Field::Name);
        assert_eq!(f.error(Field::Name), Some(EMPTY_FIELD_ERROR));
        f.push_char(Field::Name, 'x');
        assert_eq!(f.error(Field::Name), None);
        f.backspace(Field::Name);
        assert_eq!(f.error(Field::Name), Some(EMPTY_FIELD_ERROR));
    }

    #[test]
    fn validate_all_rejects_any_empty_field() {
        for missing in Field::ALL {
            let mut f = CommandForm::default();
            for field in Field::ALL {
                if field != missing {
                    f.set(field, "value");
                }
            }
            assert!(!f.validate_all());
            assert_eq!(f.errors(), vec![(missing, EMPTY_FIELD_ERROR)]);
        }
    }

    #[test]
    fn whitespace_only_is_empty() {
        let mut f = CommandForm::default();
        f.set(Field::Name, "n");
        f.set(Field::Path, "   ");
        f.set(Field::Cmd, "ls");
        assert!(!f.validate_all());
        assert_eq!(f.error(Field::Path), Some(EMPTY_FIELD_ERROR));
    }

    #[test]
    fn record_is_trimmed_and_idle() {
        let mut f = CommandForm::default();
        f.set(Field::Name, " list ");
        f.set(Field::Path, "/tmp");
        f.set(Field::Cmd, "echo hi ");
        assert!(f.validate_all());
        let r = f.to_record();
        assert_eq!((r.name.as_str(), r.cmd.as_str(), r.path.as_str()), ("list", "echo hi", "/tmp"));
        assert!(r.id.is_none());
        assert!(!r.run_state.is_running());
        assert!(!r.disabled);

        f.clear();
        assert_eq!(f.value(Field::Cmd), "");
        assert_eq!(f.error(Field::Cmd), None);
    }

    #[test]
    fn field_cycle_wraps() {
        assert_eq!(Field::Cmd.next(), Field::Name);
        assert_eq!(Field::Name.prev(), Field::Cmd);
    }
}
