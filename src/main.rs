use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use songbook::config;
use songbook::repository::LoadProgress;
use songbook::{SearchField, Song, SongRepository};

#[derive(Debug, Parser)]
#[command(name = "songbook", version, about = "Worship song library")]
struct Cli {
    /// Override config file path.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every song.
    List {
        /// Report load progress on stderr.
        #[arg(long)]
        progress: bool,
    },
    /// Print a song's lyrics in playback order.
    Show {
        id: i64,
        /// Keep chord lines.
        #[arg(long)]
        chords: bool,
    },
    /// Import songs from XML files.
    Import { files: Vec<PathBuf> },
    /// Write a song as XML to a file or stdout.
    Export {
        id: i64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Search titles and lyrics.
    Search {
        query: String,
        #[arg(long, value_enum, default_value_t = SearchField::Any)]
        field: SearchField,
    },
    /// Set a song's playback sequence, e.g. "V1 C V2 C".
    Sequence { id: i64, sequence: String },
    /// Remove songs by id.
    Remove { ids: Vec<i64> },
    /// Set or clear the church CCLI licence printed in footers.
    Licence { number: Option<String> },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref()).context("load config")?;

    if let Command::Licence { number } = cli.command {
        cfg.lyrics.church_ccli = number.filter(|n| !n.trim().is_empty());
        config::save(&cfg, cli.config.as_deref()).context("save config")?;
        match &cfg.lyrics.church_ccli {
            Some(n) => println!("Footers now show CCLI Licence #{n}."),
            None => println!("Cleared church licence."),
        }
        return Ok(());
    }

    let repo = SongRepository::open(&cfg).context("open song repository")?;

    match cli.command {
        Command::List { progress } => {
            let songs = if progress {
                let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
                let reporter = std::thread::spawn(move || {
                    while let Some(event) = rx.blocking_recv() {
                        match event {
                            LoadProgress::Loading(f) => eprint!("\rloading {:3.0}%", f * 100.0),
                            LoadProgress::Done => eprintln!("\rloading done"),
                        }
                    }
                });
                let songs = repo.get_all_with_progress(&tx)?;
                drop(tx);
                let _ = reporter.join();
                songs
            } else {
                repo.get_all()?
            };
            print_songs(&songs);
        }
        Command::Show { id, chords } => {
            let song = find(&repo, id)?;
            println!("{}", song.title());
            if !song.author().is_empty() {
                println!("{}", song.author());
            }
            println!();
            println!("{}", song.lyrics(chords, false, true));
        }
        Command::Import { files } => {
            let mut songs = Vec::with_capacity(files.len());
            for path in &files {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("read {}", path.display()))?;
                let song = Song::from_xml(&raw, cfg.lyrics.church_ccli.as_deref())
                    .with_context(|| format!("parse {}", path.display()))?;
                songs.push(song);
            }
            if !repo.add(&mut songs, true)? {
                anyhow::bail!("no songs imported");
            }
            for song in songs.iter().filter(|s| s.is_persisted()) {
                println!("{:>6}  {}", song.id(), song.title());
            }
        }
        Command::Export { id, out } => {
            let xml = find(&repo, id)?.to_xml();
            match out {
                Some(path) => std::fs::write(&path, xml)
                    .with_context(|| format!("write {}", path.display()))?,
                None => println!("{xml}"),
            }
        }
        Command::Search { query, field } => {
            let songs = repo.search(&query, field)?;
            print_songs(&songs);
        }
        Command::Sequence { id, sequence } => {
            let mut song = find(&repo, id)?;
            song.set_sequence(sequence);
            if !repo.update(&mut song, false)? {
                anyhow::bail!("couldn't update song {id}");
            }
            let order: Vec<&str> = song
                .sections_in_sequence()
                .iter()
                .map(|s| s.title().unwrap_or("-"))
                .collect();
            println!("{}", order.join(" / "));
        }
        Command::Remove { ids } => {
            let mut songs = Vec::with_capacity(ids.len());
            for id in ids {
                songs.push(find(&repo, id)?);
            }
            if !repo.remove(&songs)? {
                anyhow::bail!("nothing removed");
            }
            println!("Removed {} song(s).", songs.len());
        }
        Command::Licence { .. } => {}
    }

    Ok(())
}

fn find(repo: &SongRepository, id: i64) -> anyhow::Result<Song> {
    repo.find(id)?
        .with_context(|| format!("no song with id {id}"))
}

fn print_songs(songs: &[Song]) {
    for song in songs {
        let author = if song.author().is_empty() {
            String::new()
        } else {
            format!(" - {}", song.author())
        };
        println!("{:>6}  {}{}", song.id(), song.title(), author);
    }
}
