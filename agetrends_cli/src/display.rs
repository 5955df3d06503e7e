use agetrends::COL;
use comfy_table::{presets::NOTHING, *};
use itertools::izip;
use polars::frame::DataFrame;

fn bordered_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            header
                .into_iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        )
        .set_style(comfy_table::TableComponent::BottomBorder, '─')
        .set_style(comfy_table::TableComponent::MiddleHeaderIntersections, '─')
        .set_style(comfy_table::TableComponent::HeaderLines, '─')
        .set_style(comfy_table::TableComponent::BottomBorderIntersections, '─')
        .set_style(comfy_table::TableComponent::TopBorder, '─')
        .set_style(comfy_table::TableComponent::TopBorderIntersections, '─');
    table
}

/// Table of the series of a dataset, as produced by `Dataset::series_summary`.
pub fn display_series(summary: &DataFrame) -> anyhow::Result<()> {
    let mut table = bordered_table(vec!["Series", "Country", "Region", "Age", "Sex", "Rows"]);
    for (series, country, region, age, sex, rows) in izip!(
        summary.column(COL::SERIES)?.str()?,
        summary.column(COL::COUNTRY)?.str()?,
        summary.column(COL::REGION)?.str()?,
        summary.column(COL::AGE)?.i32()?,
        summary.column(COL::SEX)?.str()?,
        summary.column(COL::ROWS)?.u32()?,
    ) {
        table.add_row(vec![
            series.unwrap_or_default().to_string(),
            country.unwrap_or_default().to_string(),
            region.unwrap_or_default().to_string(),
            age.map(|a| a.to_string()).unwrap_or_default(),
            sex.unwrap_or_default().to_string(),
            rows.map(|r| r.to_string()).unwrap_or_default(),
        ]);
    }
    if let Some(column) = table.column_mut(5) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    println!("\n{}", table);
    Ok(())
}

pub fn display_regions(countries: &[String], regions: &[String]) {
    let mut table = bordered_table(vec!["Region"]);
    for region in regions {
        table.add_row(vec![region]);
    }
    println!("\nRegions of {}:", countries.join(", "));
    println!("{}", table);
}
