use std::error::Error;
use std::io::{self, Write};

use chrono::Utc;
use clap::Parser;

use pagenotes::config::{Cli, Command, Config};
use pagenotes::note::{expired_tombstones, visible_notes, Note};
use pagenotes::store::{NoteBackend, NoteStore, StoreError};
use pagenotes::{logging, nlog, Codec, RemoteStore, SqliteKeyStorage};

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    logging::init();
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(&cli)?;

    let storage = SqliteKeyStorage::open(&config.key_database_path())?;
    let remote = RemoteStore::new(
        config.endpoint.as_str(),
        config.user_id.as_str(),
        Codec::new(storage),
    );
    nlog!(
        "using {} at {}",
        logging::user_id(&config.user_id),
        config.endpoint
    );
    let store = NoteStore::new(remote)?;

    execute(&store, cli.command, &mut io::stdout().lock())
}

/// Run one subcommand. Output is only written once the change is persisted.
fn execute<B: NoteBackend>(
    store: &NoteStore<B>,
    command: Command,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    match command {
        Command::List { all } => {
            let notes = store.get_all_notes()?;
            let now = Utc::now();
            let shown: Vec<&Note> = if all {
                notes.iter().collect()
            } else {
                visible_notes(&notes, now)
            };
            for note in shown {
                print_note(out, note)?;
            }
        }
        Command::Add {
            title,
            content,
            url,
        } => {
            let note = Note::create(title, content, url);
            let id = note.id().to_string();
            store.insert(note)?;
            writeln!(out, "{id}")?;
        }
        Command::Edit {
            id,
            title,
            content,
            url,
        } => {
            let mut note = find(store, &id)?;
            if let Some(title) = title {
                note.title = title;
            }
            if let Some(content) = content {
                note.content = content;
            }
            if let Some(url) = url {
                note.url = url;
            }
            store.update(note)?;
        }
        Command::Remove { id, hard } => {
            let mut note = find(store, &id)?;
            if hard {
                store.delete(&note)?;
            } else {
                note.soft_delete(Utc::now());
                store.update(note)?;
            }
        }
        Command::Restore { id } => {
            let mut note = find(store, &id)?;
            note.restore();
            store.update(note)?;
        }
        Command::Purge => {
            let notes = store.get_all_notes()?;
            let expired: Vec<Note> = expired_tombstones(&notes, Utc::now())
                .into_iter()
                .cloned()
                .collect();
            for note in &expired {
                store.delete(note)?;
            }
            writeln!(out, "purged {} note(s)", expired.len())?;
        }
    }
    Ok(())
}

fn find<B: NoteBackend>(store: &NoteStore<B>, id: &str) -> Result<Note, StoreError> {
    store
        .get_all_notes()?
        .into_iter()
        .find(|note| note.id() == id)
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
}

fn print_note(out: &mut impl Write, note: &Note) -> io::Result<()> {
    let marker = match note.soft_deleted() {
        Some(at) => format!(" (deleted {})", at.to_rfc3339()),
        None => String::new(),
    };
    writeln!(out, "{}  {}{}", note.id(), note.title, marker)?;
    if !note.url.is_empty() {
        writeln!(out, "    {}", note.url)?;
    }
    if !note.content.is_empty() {
        writeln!(out, "    {}", note.content)?;
    }
    Ok(())
}
