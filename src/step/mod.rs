// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The keyword interpreter.
//!
//! DSL keywords live in the step *text* (the Gherkin keyword — `Given`,
//! `When`, `*` — is decoration). A step whose text starts with no known
//! keyword is evaluated as a bare script expression, which also covers
//! "keywords" that are really script punctuation (`foo.bar()`).

mod assign;
mod call;
mod mutate;
mod request;

use crate::{error::StepError, runtime::ScenarioRuntime};

/// One DSL keyword. Spellings live in [`KEYWORDS`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Keyword {
    Def,
    Text,
    Table,
    Yaml,
    Csv,
    Str,
    Json,
    Xml,
    XmlString,
    Bytes,
    Copy,
    Assert,
    Match,
    Set,
    Remove,
    Replace,
    Print,
    Status,
    Url,
    Path,
    Param,
    Params,
    Header,
    Headers,
    Cookie,
    Cookies,
    FormField,
    FormFields,
    Request,
    Method,
    RetryUntil,
    MultipartFile,
    MultipartFiles,
    MultipartField,
    MultipartFields,
    MultipartEntity,
    Call,
    CallOnce,
    Configure,
    Eval,
    Driver,
}

/// Keyword spellings. Longer spellings precede their prefixes so that
/// `callonce` never parses as `call`, nor `form fields` as `form field`.
const KEYWORDS: &[(&str, Keyword)] = &[
    ("multipart fields", Keyword::MultipartFields),
    ("multipart field", Keyword::MultipartField),
    ("multipart files", Keyword::MultipartFiles),
    ("multipart file", Keyword::MultipartFile),
    ("multipart entity", Keyword::MultipartEntity),
    ("form fields", Keyword::FormFields),
    ("form field", Keyword::FormField),
    ("retry until", Keyword::RetryUntil),
    ("callonce", Keyword::CallOnce),
    ("call", Keyword::Call),
    ("configure", Keyword::Configure),
    ("xmlstring", Keyword::XmlString),
    ("xml", Keyword::Xml),
    ("json", Keyword::Json),
    ("yaml", Keyword::Yaml),
    ("csv", Keyword::Csv),
    ("string", Keyword::Str),
    ("bytes", Keyword::Bytes),
    ("text", Keyword::Text),
    ("table", Keyword::Table),
    ("copy", Keyword::Copy),
    ("def", Keyword::Def),
    ("set", Keyword::Set),
    ("remove", Keyword::Remove),
    ("replace", Keyword::Replace),
    ("match", Keyword::Match),
    ("assert", Keyword::Assert),
    ("print", Keyword::Print),
    ("eval", Keyword::Eval),
    ("url", Keyword::Url),
    ("path", Keyword::Path),
    ("params", Keyword::Params),
    ("param", Keyword::Param),
    ("headers", Keyword::Headers),
    ("header", Keyword::Header),
    ("cookies", Keyword::Cookies),
    ("cookie", Keyword::Cookie),
    ("request", Keyword::Request),
    ("method", Keyword::Method),
    ("status", Keyword::Status),
    ("driver", Keyword::Driver),
];

/// Extracts the leading keyword, requiring a word boundary after it.
#[must_use]
pub fn parse_keyword(text: &str) -> Option<(Keyword, &str)> {
    for (spelling, keyword) in KEYWORDS {
        if let Some(rest) = text.strip_prefix(spelling) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return Some((*keyword, rest.trim_start()));
            }
        }
    }
    None
}

/// Splits step text into `(keyword, rest)` for reporting; unknown keywords
/// report an empty keyword and the full text.
#[must_use]
pub fn display_parts(value: &str) -> (&str, &str) {
    let trimmed = value.trim();
    for (spelling, _) in KEYWORDS {
        if let Some(rest) = trimmed.strip_prefix(spelling) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return (&trimmed[..spelling.len()], rest.trim_start());
            }
        }
    }
    ("", trimmed)
}

/// Finds the assignment `=`: the first one that is not part of `==`, `!=`,
/// `<=` or `>=`.
#[must_use]
pub fn split_assign(text: &str) -> Option<(&str, &str)> {
    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b != b'=' {
            continue;
        }
        let prev = i.checked_sub(1).map(|p| bytes[p]);
        let next = bytes.get(i + 1);
        if matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) || next == Some(&b'=')
        {
            continue;
        }
        return Some((text[..i].trim(), text[i + 1..].trim()));
    }
    None
}

/// The right-hand side of an assignment: the step text after `=`, or the
/// doc-string when the text ends at the `=`.
pub(crate) fn rhs_or_docstring<'s>(
    rhs: &'s str,
    docstring: Option<&'s str>,
) -> &'s str {
    if rhs.is_empty() {
        docstring.unwrap_or_default()
    } else {
        rhs
    }
}

/// Interprets one step against the scenario runtime.
///
/// # Errors
///
/// Any [`StepError`]; the caller turns it into a failed [`StepResult`].
///
/// [`StepResult`]: crate::result::StepResult
pub async fn execute(
    rt: &mut ScenarioRuntime,
    step: &gherkin::Step,
) -> Result<(), StepError> {
    let text = step.value.trim();
    let docstring = step
        .docstring
        .as_deref()
        .map(|d| d.trim_matches(|c| c == '\n' || c == '\r'));
    let table = step.table.as_ref();

    let Some((keyword, rest)) = parse_keyword(text) else {
        // Bare script expression; also the `foo.bar()` step form.
        return rt.eval(text).map(drop);
    };

    match keyword {
        Keyword::Def => {
            let (name, rhs) = split_assign(rest).ok_or_else(|| {
                StepError::Parse(format!("def needs an assignment: {rest}"))
            })?;
            let rhs = rhs_or_docstring(rhs, docstring);
            if let Some(call_text) = rhs.strip_prefix("call ") {
                return call::call_step(rt, call_text, Some(name), false).await;
            }
            if let Some(call_text) = rhs.strip_prefix("callonce ") {
                return call::call_step(rt, call_text, Some(name), true).await;
            }
            assign::def(rt, name, rhs)
        }
        Keyword::Text => {
            let (name, rhs) = split_assign(rest).ok_or_else(|| {
                StepError::Parse(format!("text needs an assignment: {rest}"))
            })?;
            assign::text(rt, name, rhs_or_docstring(rhs, docstring))
        }
        Keyword::Json => assign::typed(rt, rest, docstring, assign::Coerce::Json),
        Keyword::Xml => assign::typed(rt, rest, docstring, assign::Coerce::Xml),
        Keyword::XmlString => {
            assign::typed(rt, rest, docstring, assign::Coerce::XmlString)
        }
        Keyword::Str => assign::typed(rt, rest, docstring, assign::Coerce::Str),
        Keyword::Bytes => {
            assign::typed(rt, rest, docstring, assign::Coerce::Bytes)
        }
        Keyword::Csv => assign::typed(rt, rest, docstring, assign::Coerce::Csv),
        Keyword::Yaml => assign::typed(rt, rest, docstring, assign::Coerce::Yaml),
        Keyword::Copy => assign::typed(rt, rest, docstring, assign::Coerce::Copy),
        Keyword::Table => assign::table(rt, rest, table),
        Keyword::Replace => assign::replace(rt, rest, table),
        Keyword::Set => mutate::set_step(rt, rest, table),
        Keyword::Remove => mutate::remove_step(rt, rest),
        Keyword::Match => assign::match_step(rt, rest, docstring),
        Keyword::Assert => assign::assert_step(rt, rest),
        Keyword::Print => assign::print_step(rt, rest),
        Keyword::Configure => assign::configure(rt, rest),
        Keyword::Eval => {
            let source = if rest.is_empty() {
                docstring.unwrap_or_default()
            } else {
                rest
            };
            rt.eval(source).map(drop)
        }
        Keyword::Url => request::url(rt, rest),
        Keyword::Path => request::path(rt, rest),
        Keyword::Param => request::param(rt, rest),
        Keyword::Params => request::params(rt, rest),
        Keyword::Header => request::header(rt, rest),
        Keyword::Headers => request::headers(rt, rest),
        Keyword::Cookie => request::cookie(rt, rest),
        Keyword::Cookies => request::cookies(rt, rest),
        Keyword::FormField => request::form_field(rt, rest),
        Keyword::FormFields => request::form_fields(rt, rest),
        Keyword::Request => {
            request::request_body(rt, rhs_or_docstring(rest, docstring))
        }
        Keyword::Method => request::method(rt, rest).await,
        Keyword::Status => request::status(rt, rest),
        Keyword::RetryUntil => request::retry_until(rt, rest),
        Keyword::MultipartFile => request::multipart_file(rt, rest, false),
        Keyword::MultipartFiles => request::multipart_files(rt, rest),
        Keyword::MultipartField => request::multipart_file(rt, rest, true),
        Keyword::MultipartFields => request::multipart_fields(rt, rest),
        Keyword::MultipartEntity => request::multipart_entity(rt, rest),
        Keyword::Call => call::call_step(rt, rest, None, false).await,
        Keyword::CallOnce => call::call_step(rt, rest, None, true).await,
        Keyword::Driver => Err(StepError::Parse(
            "driver steps need a browser driver, which this build does not \
             bundle"
                .into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_parse_with_word_boundaries() {
        assert_eq!(parse_keyword("def foo = 1"), Some((Keyword::Def, "foo = 1")));
        assert_eq!(
            parse_keyword("callonce read(\"a.feature\")"),
            Some((Keyword::CallOnce, "read(\"a.feature\")")),
        );
        assert_eq!(
            parse_keyword("form fields { a: 1 }"),
            Some((Keyword::FormFields, "{ a: 1 }")),
        );
        // `defx` is not `def`.
        assert_eq!(parse_keyword("defx = 1"), None);
        // Script punctuation is not a keyword.
        assert_eq!(parse_keyword("foo.bar()"), None);
    }

    #[test]
    fn split_assign_skips_comparison_operators() {
        assert_eq!(split_assign("foo = bar == 1"), Some(("foo", "bar == 1")));
        assert_eq!(split_assign("a != b"), None);
        assert_eq!(split_assign("a <= b"), None);
        assert_eq!(split_assign("x = a >= 2"), Some(("x", "a >= 2")));
    }

    #[test]
    fn display_parts_fall_back_to_bare_text() {
        assert_eq!(display_parts("def a = 1"), ("def", "a = 1"));
        assert_eq!(display_parts("foo.bar()"), ("", "foo.bar()"));
    }
}
