//! Response decoder.
//!
//! `ConvertTo-Json` collapses cardinality: no results print nothing, one
//! result prints a bare object, several print an array. Every query goes
//! through [`decode`] so callers always see a `Vec<T>`.

use facet::Facet;

use crate::error::QuickVmError;

/// How much raw output to keep in a [`QuickVmError::DecodeFailure`].
const OUTPUT_EXCERPT: usize = 2048;

/// Decode empty / single-object / array output into a list.
pub fn decode<T>(raw: &[u8]) -> Result<Vec<T>, QuickVmError>
where
    T: for<'a> Facet<'a>,
{
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_start_matches('\u{feff}').trim();

    match text.chars().next() {
        None => Ok(Vec::new()),
        Some('{') => facet_json::from_str::<T>(text)
            .map(|item| vec![item])
            .map_err(|e| failure(e.to_string(), text)),
        Some('[') => facet_json::from_str::<Vec<T>>(text).map_err(|e| failure(e.to_string(), text)),
        Some(_) => Err(failure("unrecognized output shape".into(), text)),
    }
}

/// Decode output that must describe exactly one object.
pub fn decode_one<T>(raw: &[u8]) -> Result<T, QuickVmError>
where
    T: for<'a> Facet<'a>,
{
    let mut items = decode::<T>(raw)?;
    match items.len() {
        1 => items.pop().ok_or_else(|| failure("expected one object".into(), "")),
        n => Err(failure(
            format!("expected exactly one object, got {n}"),
            &String::from_utf8_lossy(raw),
        )),
    }
}

fn failure(message: String, text: &str) -> QuickVmError {
    let output = match text.char_indices().nth(OUTPUT_EXCERPT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    };
    QuickVmError::DecodeFailure { message, output }
}
