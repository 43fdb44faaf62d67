use crate::{record::two_places, CostRecord};

fn table_header() -> Vec<&'static str> {
    vec![
        "Project",
        "Service",
        "Yesterday Cost",
        "Today Cost",
        "Change Rate (%)",
    ]
}

fn to_table_row(record: &CostRecord, anomalous: bool) -> Vec<comfy_table::Cell> {
    let cells = vec![
        comfy_table::Cell::new(&record.project),
        comfy_table::Cell::new(&record.service),
        comfy_table::Cell::new(two_places(record.yesterday_cost))
            .set_alignment(comfy_table::CellAlignment::Right),
        comfy_table::Cell::new(two_places(record.today_cost))
            .set_alignment(comfy_table::CellAlignment::Right),
        comfy_table::Cell::new(two_places(record.change_rate))
            .set_alignment(comfy_table::CellAlignment::Right),
    ];
    if anomalous {
        cells
            .into_iter()
            .map(|cell| cell.fg(comfy_table::Color::Red))
            .collect()
    } else {
        cells
    }
}

/// Builds a table of every record, highlighting those above `threshold`.
pub fn build_table(records: &[CostRecord], threshold: f64) -> comfy_table::Table {
    let mut table = comfy_table::Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .apply_modifier(comfy_table::modifiers::UTF8_SOLID_INNER_BORDERS);
    table.set_header(table_header());
    for record in records {
        table.add_row(to_table_row(
            record,
            crate::classify::is_anomalous(record, threshold),
        ));
    }
    table
}

/// Writes the titled table of `records` to `out`.
pub fn write_table<W: std::io::Write>(
    out: &mut W,
    title: &str,
    records: &[CostRecord],
    threshold: f64,
) -> std::io::Result<()> {
    let table = build_table(records, threshold);
    writeln!(out, "\n{title}:")?;
    writeln!(out, "{table}")
}

/// Prints the table to stderr, leaving stdout to the run's report.
pub fn print_table(title: &str, records: &[CostRecord], threshold: f64) {
    if let Err(error) = write_table(&mut std::io::stderr().lock(), title, records, threshold) {
        tracing::warn!(%error, "failed to print change rate summary");
    }
}
