//! CSV-like context tables.
//!
//! Cells are joined by `",\t"` and rows by `"\n"`. Tables are wrapped in
//! titled sections such as
//!
//! ~~~text
//! -----Entities-----
//! ```csv
//! id,	entity,	type,	description,	rank
//! ```
//! ~~~

/// Render rows, the first being the header.
pub fn to_csv<R, C>(rows: R) -> String
where
    R: IntoIterator,
    R::Item: IntoIterator<Item = C>,
    C: ToString,
{
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|cell| cell.to_string())
                .collect::<Vec<_>>()
                .join(",\t")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A titled csv section.
pub fn section(title: &str, csv: &str) -> String {
    format!("-----{title}-----\n```csv\n{csv}\n```")
}
