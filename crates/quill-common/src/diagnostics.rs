//! Diagnostic records produced by every stage of the pipeline.
//!
//! Diagnostics are values: the loader, checker, and bundler accumulate
//! them and keep going wherever recovery is possible. The canonical
//! printed form is
//! `<file>:<line>:<col>: <severity>: <message> [<code>]`,
//! optionally followed by the source line and a caret span.

use crate::position::{LineMap, SourceLocation};
use crate::span::Span;
use serde::{Deserialize, Serialize};

/// Stable error codes, one per diagnosable condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    ParseError,
    SymbolNotFound,
    TypeMismatch,
    PropertyNotFound,
    ConstructorInMixin,
    DecoratorNotAllowed,
    UnknownIntrinsic,
    NonExhaustiveMatch,
    UnreachableCase,
    UnsupportedPattern,
    CannotExtendFinal,
    CannotOverrideFinal,
    AbstractInstantiation,
    AbstractMethodOutsideAbstract,
    MissingAbstractImplementation,
    ConstraintViolation,
    ArgumentCountMismatch,
    UnionMixesPrimitiveAndReference,
    FieldAccessBeforeInitialization,
    InvalidCast,
    InvalidOverride,
    MixinRequirementUnmet,
    DuplicateDeclaration,
    ImportCycle,
    NotCallable,
    WrongDeclarationKind,
    InvalidThis,
    MissingReturn,
    ClosureParameterNeedsAnnotation,
    JumpOutsideLoop,
    CodegenFailure,
}

impl ErrorCode {
    /// The code's printed name, used in the `[<code>]` suffix.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "ParseError",
            ErrorCode::SymbolNotFound => "SymbolNotFound",
            ErrorCode::TypeMismatch => "TypeMismatch",
            ErrorCode::PropertyNotFound => "PropertyNotFound",
            ErrorCode::ConstructorInMixin => "ConstructorInMixin",
            ErrorCode::DecoratorNotAllowed => "DecoratorNotAllowed",
            ErrorCode::UnknownIntrinsic => "UnknownIntrinsic",
            ErrorCode::NonExhaustiveMatch => "NonExhaustiveMatch",
            ErrorCode::UnreachableCase => "UnreachableCase",
            ErrorCode::UnsupportedPattern => "UnsupportedPattern",
            ErrorCode::CannotExtendFinal => "CannotExtendFinal",
            ErrorCode::CannotOverrideFinal => "CannotOverrideFinal",
            ErrorCode::AbstractInstantiation => "AbstractInstantiation",
            ErrorCode::AbstractMethodOutsideAbstract => "AbstractMethodOutsideAbstract",
            ErrorCode::MissingAbstractImplementation => "MissingAbstractImplementation",
            ErrorCode::ConstraintViolation => "ConstraintViolation",
            ErrorCode::ArgumentCountMismatch => "ArgumentCountMismatch",
            ErrorCode::UnionMixesPrimitiveAndReference => "UnionMixesPrimitiveAndReference",
            ErrorCode::FieldAccessBeforeInitialization => "FieldAccessBeforeInitialization",
            ErrorCode::InvalidCast => "InvalidCast",
            ErrorCode::InvalidOverride => "InvalidOverride",
            ErrorCode::MixinRequirementUnmet => "MixinRequirementUnmet",
            ErrorCode::DuplicateDeclaration => "DuplicateDeclaration",
            ErrorCode::ImportCycle => "ImportCycle",
            ErrorCode::NotCallable => "NotCallable",
            ErrorCode::WrongDeclarationKind => "WrongDeclarationKind",
            ErrorCode::InvalidThis => "InvalidThis",
            ErrorCode::MissingReturn => "MissingReturn",
            ErrorCode::ClosureParameterNeedsAnnotation => "ClosureParameterNeedsAnnotation",
            ErrorCode::JumpOutsideLoop => "JumpOutsideLoop",
            ErrorCode::CodegenFailure => "CodegenFailure",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

/// A single diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl Diagnostic {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            location: None,
        }
    }

    pub fn warning(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            message: message.into(),
            location: None,
        }
    }

    /// Attach a location computed from a span and the file's line map.
    #[must_use]
    pub fn with_span(mut self, file: &str, span: Span, line_map: &LineMap) -> Self {
        let pos = line_map.offset_to_position(span.start);
        self.location = Some(SourceLocation {
            file: file.to_string(),
            line: pos.line,
            column: pos.column,
            start: span.start,
            length: span.len(),
        });
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// The one-line printed form. Locations print 1-indexed.
    #[must_use]
    pub fn printed(&self) -> String {
        match &self.location {
            Some(loc) => format!(
                "{}:{}:{}: {}: {} [{}]",
                loc.file,
                loc.line + 1,
                loc.column + 1,
                self.severity.as_str(),
                self.message,
                self.code
            ),
            None => format!("{}: {} [{}]", self.severity.as_str(), self.message, self.code),
        }
    }

    /// The printed form followed by the source line and a caret span.
    #[must_use]
    pub fn rendered(&self, source: &str) -> String {
        let Some(loc) = &self.location else {
            return self.printed();
        };
        let line_map = LineMap::build(source);
        let line = line_map.line_text(loc.start, source);
        let caret_len = (loc.length.max(1) as usize).min(line.len().max(1));
        let mut out = self.printed();
        out.push('\n');
        out.push_str(line);
        out.push('\n');
        out.push_str(&" ".repeat(loc.column as usize));
        out.push_str(&"^".repeat(caret_len));
        out
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.printed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printed_form_matches_contract() {
        let src = "let x: i32 = true;\n";
        let map = LineMap::build(src);
        let diag = Diagnostic::error(ErrorCode::TypeMismatch, "expected 'i32', found 'true'")
            .with_span("main.ql", Span::new(13, 17), &map);
        assert_eq!(
            diag.printed(),
            "main.ql:1:14: error: expected 'i32', found 'true' [TypeMismatch]"
        );
    }

    #[test]
    fn rendered_includes_caret_span() {
        let src = "let x: i32 = true;\n";
        let map = LineMap::build(src);
        let diag = Diagnostic::error(ErrorCode::TypeMismatch, "expected 'i32', found 'true'")
            .with_span("main.ql", Span::new(13, 17), &map);
        let rendered = diag.rendered(src);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[1], "let x: i32 = true;");
        assert_eq!(lines[2], "             ^^^^");
    }

    #[test]
    fn diagnostics_without_location_still_print() {
        let diag = Diagnostic::error(ErrorCode::ImportCycle, "import cycle involving 'a.ql'");
        assert_eq!(
            diag.printed(),
            "error: import cycle involving 'a.ql' [ImportCycle]"
        );
    }
}
