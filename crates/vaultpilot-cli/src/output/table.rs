use anyhow::Result;
use comfy_table::Table;

pub fn print_table(table: Table) -> Result<()> {
    println!("{table}");
    Ok(())
}

/// Table with the given header, or a placeholder line when there are no rows.
pub fn print_rows(header: Vec<&str>, rows: Vec<Vec<String>>, empty: &str) -> Result<()> {
    if rows.is_empty() {
        println!("{empty}");
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(header);
    for row in rows {
        table.add_row(row);
    }
    print_table(table)
}
