#[cfg(feature = "web")]
use crate::error::{AppError, AppResult};
use crate::totals::{ItemLine, Summary};

const HEADER: [&str; 5] = ["Item", "Assignee", "Quantity", "Unit price", "Line total"];

/// Quote a field if it holds a comma, quote or newline
fn escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn push_row(csv: &mut String, fields: &[&str]) {
    let row: Vec<String> = fields.iter().map(|f| escape(f)).collect();
    csv.push_str(&row.join(","));
    csv.push('\n');
}

fn item_fields(item: &ItemLine) -> [String; 5] {
    [
        item.name.clone(),
        item.assignee.clone().unwrap_or_default(),
        item.quantity.clone(),
        item.unit_price.clone(),
        item.line_total.to_string(),
    ]
}

/// Convert a collection summary to CSV
///
/// One row per item, then one subtotal row per member (group collections),
/// an unassigned row when some items belong to no member, and the grand total.
///
/// # Examples
/// ```
/// use splitbill::expense::{CollectionKind, ExpenseCollection, LineItem, NewCollection};
/// use splitbill::export::to_csv;
/// use splitbill::totals::summarize;
///
/// let doc = ExpenseCollection::from_new(
///     "me",
///     NewCollection {
///         kind: CollectionKind::Individual,
///         name: "Groceries".into(),
///         description: "Week 1".into(),
///         members: vec![],
///         items: vec![LineItem::new("Milk", "2", "1.10")],
///     },
///     chrono::Utc::now(),
/// );
/// let csv = to_csv(&summarize(&doc));
/// assert!(csv.ends_with("Grand total,,,,2.20\n"));
/// ```
pub fn to_csv(summary: &Summary) -> String {
    let mut csv = String::new();
    push_row(&mut csv, &HEADER);

    for item in &summary.items {
        let fields = item_fields(item);
        let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
        push_row(&mut csv, &refs);
    }

    for member in &summary.members {
        let subtotal = member.subtotal.to_string();
        push_row(&mut csv, &["Subtotal", &member.member, "", "", &subtotal]);
    }
    if !summary.unassigned.is_empty() {
        let total = summary.unassigned_total.to_string();
        push_row(&mut csv, &["Unassigned", "", "", "", &total]);
    }

    let grand_total = summary.grand_total.to_string();
    push_row(&mut csv, &["Grand total", "", "", "", &grand_total]);
    csv
}

/// Convert a collection summary to XLSX, laid out like the CSV
///
/// Amounts are written as numbers so the sheet can sum them.
#[cfg(feature = "web")]
pub fn to_xlsx(summary: &Summary) -> AppResult<Vec<u8>> {
    use rust_xlsxwriter::{Format, Workbook, Worksheet};

    let to_export_error = |e: rust_xlsxwriter::XlsxError| AppError::Export(e.to_string());
    let bold = Format::new().set_bold();

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(sheet_name(&summary.name)).map_err(to_export_error)?;

    for (col, title) in HEADER.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, *title, &bold)
            .map_err(to_export_error)?;
    }

    let mut row: u32 = 1;
    for item in &summary.items {
        worksheet.write_string(row, 0, &item.name).map_err(to_export_error)?;
        worksheet
            .write_string(row, 1, item.assignee.as_deref().unwrap_or_default())
            .map_err(to_export_error)?;
        worksheet.write_string(row, 2, &item.quantity).map_err(to_export_error)?;
        worksheet.write_string(row, 3, &item.unit_price).map_err(to_export_error)?;
        worksheet
            .write_number(row, 4, item.line_total.as_f64())
            .map_err(to_export_error)?;
        row += 1;
    }

    let mut totals: Vec<(String, String, f64)> = summary
        .members
        .iter()
        .map(|m| ("Subtotal".to_string(), m.member.clone(), m.subtotal.as_f64()))
        .collect();
    if !summary.unassigned.is_empty() {
        totals.push((
            "Unassigned".to_string(),
            String::new(),
            summary.unassigned_total.as_f64(),
        ));
    }
    totals.push((
        "Grand total".to_string(),
        String::new(),
        summary.grand_total.as_f64(),
    ));

    for (label, member, amount) in totals {
        worksheet
            .write_string_with_format(row, 0, &label, &bold)
            .map_err(to_export_error)?;
        worksheet.write_string(row, 1, &member).map_err(to_export_error)?;
        worksheet.write_number(row, 4, amount).map_err(to_export_error)?;
        row += 1;
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer().map_err(to_export_error)
}

/// Excel sheet names are at most 31 characters and exclude `[]:*?/\`
#[cfg(feature = "web")]
fn sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(31)
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'').to_string();
    if cleaned.is_empty() {
        "Expenses".to_string()
    } else {
        cleaned
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn item_rows(items: &[ItemLine], with_assignee: bool) -> String {
    let mut rows = String::new();
    for item in items {
        rows.push_str("<tr><td>");
        rows.push_str(&escape_html(&item.name));
        rows.push_str("</td>");
        if with_assignee {
            rows.push_str("<td>");
            rows.push_str(&escape_html(item.assignee.as_deref().unwrap_or("")));
            rows.push_str("</td>");
        }
        rows.push_str(&format!(
            "<td>{}</td><td>{}</td><td class=\"amount\">{}</td></tr>\n",
            escape_html(&item.quantity),
            escape_html(&item.unit_price),
            item.line_total
        ));
    }
    rows
}

/// Render the summary screen as an HTML page
///
/// Group collections get one section per member, plus a warning block for
/// items whose assignee is no longer a member.
pub fn to_html(summary: &Summary) -> String {
    let mut body = String::new();

    if summary.members.is_empty() {
        body.push_str("<table><tr><th>Item</th><th>Quantity</th><th>Price</th><th>Total</th></tr>\n");
        body.push_str(&item_rows(&summary.items, false));
        body.push_str("</table>\n");
    } else {
        for member in &summary.members {
            body.push_str(&format!(
                "<section class=\"member\"><h2>{}</h2>\n<table><tr><th>Item</th><th>Quantity</th><th>Price</th><th>Total</th></tr>\n",
                escape_html(&member.member)
            ));
            body.push_str(&item_rows(&member.items, false));
            body.push_str(&format!(
                "</table>\n<p class=\"subtotal\">Subtotal: {}</p></section>\n",
                member.subtotal
            ));
        }
    }

    if let Some(warning) = &summary.warning {
        body.push_str(&format!(
            "<section class=\"warning\"><h2>Unassigned</h2><p>{}</p>\n<table><tr><th>Item</th><th>Assignee</th><th>Quantity</th><th>Price</th><th>Total</th></tr>\n",
            escape_html(warning)
        ));
        body.push_str(&item_rows(&summary.unassigned, true));
        body.push_str("</table></section>\n");
    }

    include_str!("./static/summary.html")
        .replace("{{name}}", &escape_html(&summary.name))
        .replace("{{description}}", &escape_html(&summary.description))
        .replace("{{body}}", &body)
        .replace("{{grand_total}}", &summary.grand_total.to_string())
}

/// Suggested download name: the collection name reduced to safe characters
pub fn file_stem(summary: &Summary) -> String {
    let stem: String = summary
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let stem = stem.trim_matches('-').to_string();
    if stem.is_empty() {
        "expenses".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expense::{CollectionKind, ExpenseCollection, LineItem, NewCollection};
    use crate::totals::summarize;
    use chrono::Utc;

    fn dinner() -> Summary {
        let doc = ExpenseCollection::from_new(
            "u1",
            NewCollection {
                kind: CollectionKind::Group,
                name: "Dinner, Friday".into(),
                description: "d".into(),
                members: vec!["Ana".into(), "Luis".into()],
                items: vec![
                    LineItem::new("Bread", "2", "3.00").assigned_to("Ana"),
                    LineItem::new("Fish \"fresh\"", "1", "10.00").assigned_to("Luis"),
                    LineItem::new("Wine", "1", "8").assigned_to("Carla"),
                ],
            },
            Utc::now(),
        );
        summarize(&doc)
    }

    #[test]
    fn test_csv_layout() {
        let csv = to_csv(&dinner());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Item,Assignee,Quantity,Unit price,Line total");
        assert_eq!(lines[1], "Bread,Ana,2,3.00,6.00");
        assert_eq!(lines[2], "\"Fish \"\"fresh\"\"\",Luis,1,10.00,10.00");
        assert_eq!(lines[4], "Subtotal,Ana,,,6.00");
        assert_eq!(lines[5], "Subtotal,Luis,,,10.00");
        assert_eq!(lines[6], "Unassigned,,,,8.00");
        assert_eq!(lines[7], "Grand total,,,,24.00");
        assert_eq!(lines.len(), 8);
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn test_html_sections_and_escaping() {
        let mut summary = dinner();
        summary.members[0].member = "<Ana>".into();
        let html = to_html(&summary);
        assert!(html.contains("<h2>&lt;Ana&gt;</h2>"));
        assert!(html.contains("Subtotal: 10.00"));
        assert!(html.contains("<td>Carla</td>"));
        assert!(html.contains("24.00"));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem(&dinner()), "dinner--friday");
    }

    #[cfg(feature = "web")]
    #[test]
    fn test_xlsx_is_a_zip() {
        let bytes = to_xlsx(&dinner()).unwrap();
        assert_eq!(&bytes[..2], b"PK");
        assert_eq!(sheet_name("a/b:c"), "abc");
        assert_eq!(sheet_name("///"), "Expenses");
    }
}
