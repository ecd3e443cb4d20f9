//! Summary tables printed at the end of each command

use comfy_table::{presets::UTF8_FULL_CONDENSED, Attribute, Cell, Color, Table};
use console::style;

use crate::model::{EvaluationReport, TrainingCounts};
use crate::pipeline::{DatasetProfile, PreparedDataset, Severity};

fn section(icon: &str, title: &str) {
    println!();
    println!("    {} {}", style(icon).cyan(), style(title).white().bold());
    println!("    {}", style("─".repeat(50)).dim());
    println!();
}

fn header(table: &mut Table, names: &[&str]) {
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(
        names
            .iter()
            .map(|n| Cell::new(n).add_attribute(Attribute::Bold))
            .collect::<Vec<_>>(),
    );
}

// Indent the table
fn print_indented(table: &Table) {
    for line in table.to_string().lines() {
        println!("    {}", line);
    }
}

fn class_label(class: u8) -> String {
    Severity::from_ordinal(class)
        .map(|s| format!("{} {}", class, s.label()))
        .unwrap_or_else(|| class.to_string())
}

/// Row counts of the preparation stages
#[derive(Debug, Default)]
pub struct PreparationSummary {
    pub loaded: Vec<(String, usize)>,
    pub merged_rows: usize,
    pub rows_dropped: usize,
    pub dropped_by_column: Vec<(String, usize)>,
    pub accidents: usize,
    pub output_columns: usize,
}

impl PreparationSummary {
    pub fn from_prepared(prepared: &PreparedDataset) -> Self {
        Self {
            loaded: prepared.counts.loaded.clone(),
            merged_rows: prepared.counts.merged_rows,
            rows_dropped: prepared.fill_report.rows_dropped(),
            dropped_by_column: prepared.fill_report.dropped_by_column.clone(),
            accidents: prepared.counts.accidents,
            output_columns: prepared.accidents.width(),
        }
    }

    pub fn display(&self) {
        section("📋", "PREPARATION SUMMARY");

        let mut table = Table::new();
        header(&mut table, &["Stage", "Rows"]);
        for (family, rows) in &self.loaded {
            table.add_row(vec![Cell::new(format!("📁 Loaded {}", family)), Cell::new(rows)]);
        }
        table.add_row(vec![
            Cell::new("🔗 Merged (vehicle × person)"),
            Cell::new(self.merged_rows),
        ]);
        table.add_row(vec![
            Cell::new("🗑️  Dropped (incomplete)"),
            Cell::new(self.rows_dropped).fg(if self.rows_dropped == 0 {
                Color::White
            } else {
                Color::Red
            }),
        ]);
        table.add_row(vec![
            Cell::new("✅ Accidents"),
            Cell::new(self.accidents)
                .fg(Color::Green)
                .add_attribute(Attribute::Bold),
        ]);
        table.add_row(vec![Cell::new("📐 Columns"), Cell::new(self.output_columns)]);
        print_indented(&table);

        if !self.dropped_by_column.is_empty() {
            println!();
            println!(
                "      {}:",
                style("Rows missing a near-complete column").yellow()
            );
            for (column, count) in &self.dropped_by_column {
                println!("        {} {} ({})", style("•").dim(), column, count);
            }
        }
    }
}

/// Print per-class metrics, the confusion matrix and the resampling counts
pub fn display_evaluation(report: &EvaluationReport, counts: &TrainingCounts) {
    section("⚖️ ", "CLASS BALANCE");
    let mut balance = Table::new();
    header(
        &mut balance,
        &["Class", "Train", "Under-sampled", "Over-sampled", "Test"],
    );
    for (class, train) in &counts.train {
        let get = |m: &std::collections::BTreeMap<u8, usize>| m.get(class).copied().unwrap_or(0);
        balance.add_row(vec![
            Cell::new(class_label(*class)),
            Cell::new(train),
            Cell::new(get(&counts.undersampled)),
            Cell::new(get(&counts.oversampled)),
            Cell::new(get(&counts.test)),
        ]);
    }
    print_indented(&balance);
    if counts.excluded_uninjured > 0 {
        println!(
            "      {} accident(s) with no injured person excluded",
            style(counts.excluded_uninjured).yellow()
        );
    }

    section("📊", "EVALUATION (held-out partition)");
    let mut metrics = Table::new();
    header(&mut metrics, &["Class", "Precision", "Recall", "F1", "Support"]);
    for m in &report.per_class {
        let f1_color = if m.f1 >= 0.6 {
            Color::Green
        } else if m.f1 >= 0.3 {
            Color::Yellow
        } else {
            Color::Red
        };
        metrics.add_row(vec![
            Cell::new(class_label(m.class)),
            Cell::new(format!("{:.3}", m.precision)),
            Cell::new(format!("{:.3}", m.recall)),
            Cell::new(format!("{:.3}", m.f1)).fg(f1_color),
            Cell::new(m.support),
        ]);
    }
    metrics.add_row(vec![
        Cell::new("Macro F1").add_attribute(Attribute::Bold),
        Cell::new(""),
        Cell::new(""),
        Cell::new(format!("{:.3}", report.macro_f1))
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        Cell::new(report.samples),
    ]);
    metrics.add_row(vec![
        Cell::new("Weighted F1"),
        Cell::new(""),
        Cell::new(""),
        Cell::new(format!("{:.3}", report.weighted_f1)),
        Cell::new(""),
    ]);
    metrics.add_row(vec![
        Cell::new("Accuracy"),
        Cell::new(""),
        Cell::new(""),
        Cell::new(format!("{:.3}", report.accuracy)),
        Cell::new(""),
    ]);
    print_indented(&metrics);

    println!();
    let mut confusion = Table::new();
    let mut names = vec!["true \\ predicted".to_string()];
    names.extend(report.classes.iter().map(|c| c.to_string()));
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    header(&mut confusion, &names);
    for (i, row) in report.confusion.iter().enumerate() {
        let mut cells = vec![Cell::new(class_label(report.classes[i]))];
        cells.extend(row.iter().enumerate().map(|(j, count)| {
            let cell = Cell::new(count);
            if i == j {
                cell.fg(Color::Green)
            } else {
                cell
            }
        }));
        confusion.add_row(cells);
    }
    print_indented(&confusion);
}

/// Print the exploration summary of a prepared dataset
pub fn display_profile(profile: &DatasetProfile, top: usize) {
    section("🔎", "DATASET");
    println!("      Rows: {}", profile.rows);
    println!("      Columns: {}", profile.columns);

    section("🕳️ ", "MISSING VALUES");
    let mut missing = Table::new();
    header(&mut missing, &["Column", "Missing"]);
    for (column, ratio) in profile.missing.iter().take(top) {
        let color = if *ratio > 0.3 {
            Color::Red
        } else if *ratio > 0.0 {
            Color::Yellow
        } else {
            Color::White
        };
        missing.add_row(vec![
            Cell::new(column),
            Cell::new(format!("{:.1}%", ratio * 100.0)).fg(color),
        ]);
    }
    print_indented(&missing);

    if let Some(target) = &profile.target {
        section("🎯", "TARGET DISTRIBUTION");
        let mut dist = Table::new();
        header(&mut dist, &["Class", "Accidents", "Share"]);
        for share in target {
            dist.add_row(vec![
                Cell::new(class_label(share.class)),
                Cell::new(share.count),
                Cell::new(format!("{:.1}%", share.share * 100.0)),
            ]);
        }
        print_indented(&dist);
    }
}
