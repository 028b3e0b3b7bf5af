//! HTML digest rendering.

use super::evaluator::ViolationRecord;

const STYLE: &str = "body { font-family: Arial; font-size: 13px; }\n\
table { border-collapse: collapse; width: 100%; font-size: 13px; }\n\
th, td { border: 1px solid #ddd; padding: 8px; }\n\
th { background-color: #4CAF50; color: white; }\n\
.alert { color: red; font-weight: bold; }";

/// A titled table rendered into one notification body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestTable {
    /// Heading above the table
    pub title: String,
    /// Column headers
    pub headers: Vec<&'static str>,
    /// Rows, one cell per header
    pub rows: Vec<Vec<String>>,
    /// Column index whose cells are highlighted
    pub highlight: Option<usize>,
}

impl DigestTable {
    /// Empty table.
    pub fn new(title: impl Into<String>, headers: Vec<&'static str>) -> Self {
        Self {
            title: title.into(),
            headers,
            rows: Vec::new(),
            highlight: None,
        }
    }

    /// Highlight the cells of `column`.
    pub fn highlight(mut self, column: usize) -> Self {
        self.highlight = Some(column);
        self
    }

    /// Append one row.
    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render as a standalone HTML document.
    pub fn to_html(&self) -> String {
        let mut html = format!(
            "<html><head><style>\n{STYLE}\n</style></head><body>\n<h3>{}</h3>\n<table>\n<tr>",
            escape(&self.title)
        );
        for header in &self.headers {
            html.push_str(&format!("<th>{}</th>", escape(header)));
        }
        html.push_str("</tr>\n");
        for row in &self.rows {
            html.push_str("<tr>");
            for (i, cell) in row.iter().enumerate() {
                if self.highlight == Some(i) {
                    html.push_str(&format!("<td class=\"alert\">{}</td>", escape(cell)));
                } else {
                    html.push_str(&format!("<td>{}</td>", escape(cell)));
                }
            }
            html.push_str("</tr>\n");
        }
        html.push_str("</table></body></html>");
        html
    }
}

/// Table listing threshold violations of one experiment.
pub fn violation_table(experiment: &str, lines: &[ViolationRecord]) -> DigestTable {
    let mut table = DigestTable::new(
        format!("Threshold alerts for {experiment}"),
        vec!["Time", "Location", "Sensor", "Metric", "Value", "Allowed range"],
    )
    .highlight(4);
    for line in lines {
        table.push_row(vec![
            line.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            line.location.clone(),
            line.address.clone(),
            line.metric.to_string(),
            line.observed.to_string(),
            line.range.clone(),
        ]);
    }
    table
}

/// Subject of a threshold digest.
pub fn violation_subject(experiment: &str) -> String {
    format!("Sensor alert for {experiment}")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
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
