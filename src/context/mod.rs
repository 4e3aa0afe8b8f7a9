//! The variables a template can read.
//!
//! The render context is a statically declared struct: every readable name
//! is a field, and the field table produced by `declare_scope!` is what
//! templates are validated against at load time. A template that names
//! anything else is rejected before it can ever render, so there is no way
//! to read an internal or sensitive fact by accident.

pub mod format;
pub mod preparer;
pub mod rows;

use serde::Serialize;

pub use preparer::{ContextPreparer, PreparationInput, Prepared, PreparerSettings};
pub use rows::{
    Aggregates, ExamDateOption, RejectedDocument, Schedule, SessionFilter, SessionGroup,
    SessionOption,
};

/// Shape of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bool,
    Int,
    /// A list of rows with their own declared fields.
    List(&'static [FieldSpec]),
}

/// One declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Looks up a field table by name.
#[must_use]
pub fn find_field<'f>(fields: &'f [FieldSpec], name: &str) -> Option<&'f FieldSpec> {
    fields.iter().find(|f| f.name == name)
}

/// A value read from a scope during rendering.
#[derive(Debug, Clone)]
pub enum ContextValue<'a> {
    Empty,
    Text(&'a str),
    Bool(bool),
    Int(i64),
    List(Vec<&'a dyn Scope>),
}

impl ContextValue<'_> {
    /// Template truthiness: non-empty text, `true`, non-zero, non-empty list.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::Text(s) => !s.is_empty(),
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::List(rows) => !rows.is_empty(),
        }
    }

    /// Text rendered for a substitution. Lists render empty.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Empty | Self::List(_) => String::new(),
            Self::Text(s) => (*s).to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
        }
    }
}

/// Something names can be resolved against.
pub trait Scope: std::fmt::Debug {
    /// Returns the value of a declared field, or `None` for an undeclared
    /// name.
    fn lookup(&self, name: &str) -> Option<ContextValue<'_>>;
}

/// A struct whose fields are known statically.
pub trait Declared {
    const FIELDS: &'static [FieldSpec];
}

/// Types a declared field may have.
pub trait ScopeField {
    const KIND: FieldKind;

    fn to_value(&self) -> ContextValue<'_>;
}

impl ScopeField for String {
    const KIND: FieldKind = FieldKind::Text;

    fn to_value(&self) -> ContextValue<'_> {
        ContextValue::Text(self)
    }
}

impl ScopeField for bool {
    const KIND: FieldKind = FieldKind::Bool;

    fn to_value(&self) -> ContextValue<'_> {
        ContextValue::Bool(*self)
    }
}

impl ScopeField for i64 {
    const KIND: FieldKind = FieldKind::Int;

    fn to_value(&self) -> ContextValue<'_> {
        ContextValue::Int(*self)
    }
}

impl<T: ScopeField> ScopeField for Option<T> {
    const KIND: FieldKind = T::KIND;

    fn to_value(&self) -> ContextValue<'_> {
        self.as_ref().map_or(ContextValue::Empty, ScopeField::to_value)
    }
}

impl<R: Scope + Declared> ScopeField for Vec<R> {
    const KIND: FieldKind = FieldKind::List(R::FIELDS);

    fn to_value(&self) -> ContextValue<'_> {
        ContextValue::List(self.iter().map(|r| r as &dyn Scope).collect())
    }
}

/// Declares a scope struct together with its field table and lookup.
macro_rules! declare_scope {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
        $vis struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl Declared for $name {
            const FIELDS: &'static [FieldSpec] = &[
                $( FieldSpec { name: stringify!($field), kind: <$ty as ScopeField>::KIND }, )*
            ];
        }

        impl Scope for $name {
            fn lookup(&self, name: &str) -> Option<ContextValue<'_>> {
                match name {
                    $( stringify!($field) => Some(ScopeField::to_value(&self.$field)), )*
                    _ => None,
                }
            }
        }
    };
}

declare_scope! {
    /// One bookable training session, flattened out of its exam-date group.
    pub struct SessionRow {
        name: String,
        /// Exam date the session prepares for, `dd/mm/YYYY`.
        exam_date: String,
        start: String,
        end: String,
        start_long: String,
        end_long: String,
        is_day: bool,
        is_evening: bool,
        is_first_in_group: bool,
        is_last_in_group: bool,
    }
}

declare_scope! {
    /// One proposed exam date.
    pub struct ExamDateRow {
        date: String,
        date_long: String,
        department: String,
        /// Registration deadline, empty when unknown.
        deadline: String,
        deadline_long: String,
        /// Sessions ending before this exam date.
        sessions: Vec<SessionRow>,
    }
}

declare_scope! {
    /// A document the exam platform refused.
    pub struct RejectedDocumentRow {
        name: String,
        reason: String,
    }
}

declare_scope! {
    /// Every variable a template can read.
    pub struct RenderContext {
        first_name: String,
        state: String,
        intention: String,

        exam_date: String,
        exam_date_long: String,
        exam_department: String,
        exam_deadline: String,
        exam_deadline_long: String,

        session_name: String,
        session_start: String,
        session_end: String,

        evalbox_status: String,
        amount_due: String,
        convocation_received: bool,

        platform_username: String,
        platform_password: String,
        exam_result: String,

        eligibility_case: String,
        exam_outcome: String,

        show_dates_section: bool,
        show_sessions_section: bool,
        show_convocation_section: bool,
        show_documents_section: bool,
        show_credentials_section: bool,
        show_payment_section: bool,
        show_results_section: bool,
        show_partner_section: bool,
        show_deadline_warning: bool,
        show_force_majeure_section: bool,

        exam_dates: Vec<ExamDateRow>,
        sessions: Vec<SessionRow>,
        rejected_documents: Vec<RejectedDocumentRow>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::Flag;

    #[test]
    fn test_field_table_matches_struct() {
        assert!(find_field(RenderContext::FIELDS, "first_name").is_some());
        assert!(find_field(RenderContext::FIELDS, "crm_password").is_none());
        let Some(FieldSpec {
            kind: FieldKind::List(rows),
            ..
        }) = find_field(RenderContext::FIELDS, "exam_dates")
        else {
            panic!("exam_dates should be a list");
        };
        assert!(find_field(rows, "department").is_some());
        assert!(matches!(
            find_field(rows, "sessions").map(|f| f.kind),
            Some(FieldKind::List(_))
        ));
    }

    #[test]
    fn test_every_flag_has_a_context_field() {
        for flag in Flag::ALL {
            let field = find_field(RenderContext::FIELDS, flag.as_str())
                .unwrap_or_else(|| panic!("no field for {flag}"));
            let expected = if flag.is_text() { FieldKind::Text } else { FieldKind::Bool };
            assert_eq!(field.kind, expected);
        }
    }

    #[test]
    fn test_lookup() {
        let ctx = RenderContext {
            first_name: "Lina".to_string(),
            show_dates_section: true,
            exam_dates: vec![ExamDateRow::default()],
            ..RenderContext::default()
        };
        assert_eq!(ctx.lookup("first_name").unwrap().to_text(), "Lina");
        assert!(ctx.lookup("show_dates_section").unwrap().is_truthy());
        assert!(!ctx.lookup("show_sessions_section").unwrap().is_truthy());
        assert!(ctx.lookup("exam_dates").unwrap().is_truthy());
        assert!(!ctx.lookup("sessions").unwrap().is_truthy());
        assert!(ctx.lookup("undeclared").is_none());
    }
}
