//! Record commands: save, get, delete, find, purge.

use anyhow::{Context, Result};
use colored::Colorize;
use stash_core::{FindOptions, OrderBy, Record, RecordData, RecordId, Stash, Where};

/// Arguments of `stash find`.
#[derive(Debug, Default)]
pub(crate) struct FindArgs {
    pub(crate) filter: Option<String>,
    pub(crate) order: Vec<String>,
    pub(crate) limit: Option<usize>,
    pub(crate) offset: usize,
    pub(crate) scores: bool,
}

fn print_record(record: &Record) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&record.to_json())?);
    Ok(())
}

fn parse_json(what: &str, raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).with_context(|| format!("{what} is not valid JSON"))
}

/// Save a record given as a JSON object and print the stored form.
pub(crate) async fn save(stash: &Stash, entity: &str, raw: &str) -> Result<()> {
    let schema = stash.registry().get(entity)?;
    let data = RecordData::from_json(&schema, &parse_json("record", raw)?)?;
    let record = stash.save(entity, data).await?;
    print_record(&record)
}

/// Print one record.
pub(crate) async fn get(stash: &Stash, entity: &str, id: &str) -> Result<()> {
    let record = stash.get(entity, &RecordId::new(id)?).await?;
    print_record(&record)
}

/// Delete one record.
pub(crate) async fn delete(stash: &Stash, entity: &str, id: &str) -> Result<()> {
    stash.delete(entity, &RecordId::new(id)?).await?;
    eprintln!("{}", format!("Deleted {entity}/{id}").green());
    Ok(())
}

/// Build [`FindOptions`] from command-line arguments.
pub(crate) fn find_options(stash: &Stash, entity: &str, args: &FindArgs) -> Result<FindOptions> {
    let schema = stash.registry().get(entity)?;
    let mut options = FindOptions::new().offset(args.offset);
    if let Some(raw) = &args.filter {
        options = options.filter(Where::from_json(&schema, &parse_json("--where", raw)?)?);
    }
    for spec in &args.order {
        options = options.order(OrderBy::parse(spec)?);
    }
    if let Some(limit) = args.limit {
        options = options.limit(limit);
    }
    if args.scores {
        options = options.with_scores();
    }
    Ok(options)
}

/// Print matching records as a JSON array.
pub(crate) async fn find(stash: &Stash, entity: &str, args: &FindArgs) -> Result<()> {
    let options = find_options(stash, entity, args)?;
    let records = stash.find(entity, &options).await?;
    let rendered: Vec<_> = records.iter().map(Record::to_json).collect();
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    eprintln!("{}", format!("{} record(s)", records.len()).dimmed());
    Ok(())
}

/// Delete expired records.
pub(crate) async fn purge(stash: &Stash, entity: &str) -> Result<()> {
    let purged = stash.purge_expired(entity).await?;
    eprintln!(
        "{}",
        format!("Purged {purged} expired record(s) from {entity}").green()
    );
    Ok(())
}
