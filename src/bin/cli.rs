use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use roster_store::data::{Coordinates, Country, EyeColor, Location, Person, PersonDraft};
use roster_store::proto::command::{Op, Predicate};
use roster_store::sdk;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Snapshot file for embedded mode; set ROSTER_ADDR for remote mode
    #[arg(short, long, default_value = "data/roster.json")]
    data_file: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Add a new person to the collection
    Add(PersonArgs),
    /// Replace the person with the given id
    Update {
        id: u64,
        #[command(flatten)]
        person: PersonArgs,
    },
    /// Remove the person with the given id
    Remove { id: u64 },
    /// Remove every person in the collection
    Clear,
    /// Show all people, id ascending
    List,
    /// Show collection type, init date, and element count
    Info,
    /// Sum of the height field over all people
    SumOfHeight,
    /// Show people whose name contains the given substring
    Filter { needle: String },
    /// Remove every person matching a field predicate
    RemoveMatching(PredicateArgs),
    /// Run a command file as one atomic batch
    ExecScript { file: PathBuf },
}

#[derive(Args, Clone)]
struct PersonArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    x: f32,
    #[arg(long)]
    y: f32,
    #[arg(long)]
    height: Option<i32>,
    #[arg(long)]
    passport: Option<String>,
    /// black, orange, or brown
    #[arg(long)]
    eye_color: String,
    /// united-kingdom, germany, china, thailand, or japan
    #[arg(long)]
    nationality: String,
    #[arg(long)]
    loc_x: Option<f64>,
    #[arg(long)]
    loc_y: Option<f32>,
    #[arg(long)]
    loc_z: Option<i64>,
    #[arg(long)]
    loc_name: Option<String>,
}

impl PersonArgs {
    fn into_draft(self) -> anyhow::Result<PersonDraft> {
        let eye_color: EyeColor = self.eye_color.parse()?;
        let nationality: Country = self.nationality.parse()?;

        let location = match (self.loc_x, self.loc_y, self.loc_z) {
            (None, None, None) => {
                if self.loc_name.is_some() {
                    bail!("--loc-name requires --loc-x, --loc-y and --loc-z");
                }
                None
            }
            (Some(x), Some(y), Some(z)) => Some(Location {
                x,
                y,
                z,
                name: self.loc_name,
            }),
            _ => bail!("location needs all of --loc-x, --loc-y and --loc-z"),
        };

        Ok(PersonDraft {
            name: self.name,
            coordinates: Coordinates {
                x: self.x,
                y: self.y,
            },
            height: self.height,
            passport_id: self.passport,
            eye_color,
            nationality,
            location,
        })
    }
}

#[derive(Args, Clone)]
struct PredicateArgs {
    /// Match people whose name contains this substring
    #[arg(long)]
    name_contains: Option<String>,
    /// Match people shorter than this height
    #[arg(long)]
    height_below: Option<i32>,
    /// Match people of this nationality
    #[arg(long)]
    nationality: Option<String>,
}

impl PredicateArgs {
    fn into_predicate(self) -> anyhow::Result<Predicate> {
        match (self.name_contains, self.height_below, self.nationality) {
            (Some(needle), None, None) => Ok(Predicate::NameContains(needle)),
            (None, Some(limit), None) => Ok(Predicate::HeightBelow(limit)),
            (None, None, Some(country)) => Ok(Predicate::NationalityIs(country.parse()?)),
            _ => bail!(
                "pick exactly one of --name-contains, --height-below, --nationality"
            ),
        }
    }
}

/// One line of a script file. Scripts only carry mutations; reads belong
/// in the interactive CLI.
#[derive(Parser, Clone)]
#[command(no_binary_name = true)]
struct ScriptLine {
    #[command(subcommand)]
    op: ScriptOp,
}

#[derive(Subcommand, Clone)]
enum ScriptOp {
    Add(PersonArgs),
    Update {
        id: u64,
        #[command(flatten)]
        person: PersonArgs,
    },
    Remove {
        id: u64,
    },
    Clear,
    RemoveMatching(PredicateArgs),
}

impl ScriptOp {
    fn into_op(self) -> anyhow::Result<Op> {
        Ok(match self {
            ScriptOp::Add(person) => Op::Add(person.into_draft()?),
            ScriptOp::Update { id, person } => Op::Update {
                id,
                draft: person.into_draft()?,
            },
            ScriptOp::Remove { id } => Op::RemoveById(id),
            ScriptOp::Clear => Op::Clear,
            ScriptOp::RemoveMatching(pred) => Op::RemoveMatching(pred.into_predicate()?),
        })
    }
}

fn parse_script(content: &str) -> anyhow::Result<Vec<Op>> {
    let mut ops = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed = ScriptLine::try_parse_from(line.split_whitespace())
            .with_context(|| format!("script line {}", lineno + 1))?;
        ops.push(parsed.op.into_op()?);
    }
    Ok(ops)
}

fn print_person(person: &Person) {
    println!("Person {}:", person.id);
    println!("  name:        {}", person.name);
    println!("  created on:  {}", person.created_on);
    println!(
        "  coordinates: ({}, {})",
        person.coordinates.x, person.coordinates.y
    );
    match person.height {
        Some(h) => println!("  height:      {h}"),
        None => println!("  height:      -"),
    }
    match &person.passport_id {
        Some(p) => println!("  passport:    {p}"),
        None => println!("  passport:    -"),
    }
    println!("  eye color:   {}", person.eye_color);
    println!("  nationality: {}", person.nationality);
    match &person.location {
        Some(loc) => println!(
            "  location:    ({}, {}, {}) {}",
            loc.x,
            loc.y,
            loc.z,
            loc.name.as_deref().unwrap_or("-")
        ),
        None => println!("  location:    -"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let store = sdk::new(&cli.data_file).await?;

    match cli.command {
        Commands::Add(person) => {
            let added = store.add(person.into_draft()?).await?;
            println!("Added with id {}.", added.id);
        }
        Commands::Update { id, person } => {
            store.update(id, person.into_draft()?).await?;
            println!("Updated {id}.");
        }
        Commands::Remove { id } => {
            store.remove_by_id(id).await?;
            println!("Removed {id}.");
        }
        Commands::Clear => {
            store.clear().await?;
            println!("Collection cleared.");
        }
        Commands::List => {
            let people = store.list().await?;
            for person in &people {
                print_person(person);
            }
            println!("{} record(s).", people.len());
        }
        Commands::Info => {
            let info = store.info().await?;
            println!("Collection type: {}", info.backing);
            println!("Init date:       {}", info.init_date);
            println!("Elements:        {}", info.len);
        }
        Commands::SumOfHeight => {
            println!("{}", store.sum_of_height().await?);
        }
        Commands::Filter { needle } => {
            let people = store.filter_contains_name(&needle).await?;
            for person in &people {
                print_person(person);
            }
            println!("{} match(es).", people.len());
        }
        Commands::RemoveMatching(pred) => {
            let removed = store.remove_matching(pred.into_predicate()?).await?;
            println!("Removed {removed} record(s).");
        }
        Commands::ExecScript { file } => {
            let content = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let ops = parse_script(&content)?;
            if ops.is_empty() {
                bail!("script contains no commands");
            }
            let applied = store.run_script(ops).await?;
            println!("Applied {applied} operation(s) atomically.");
        }
    }

    Ok(())
}
