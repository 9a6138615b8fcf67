mod map_draw;
mod state;
mod ui;

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quartieri::catalog::Catalog;
use quartieri::config::{Args, TICK_MS};
use quartieri::data::{DirFetcher, Fetch, HttpFetcher, resolve_url};
use quartieri::index::CatalogIndex;
use quartieri::selection::{FetchOutcome, FetchRequest, Selection};
use state::{Action, AppState};

type Tui = Terminal<CrosstermBackend<io::Stdout>>;

/// Logs go to a file; the terminal belongs to the dashboard.
fn init_logging(path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn spawn_fetches(
    fetcher: &Arc<dyn Fetch>,
    tx: &UnboundedSender<FetchOutcome>,
    requests: Vec<FetchRequest>,
) {
    for request in requests {
        let fetcher = Arc::clone(fetcher);
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = fetcher.fetch(&request.url).await;
            // receiver is gone once the dashboard has quit
            let _ = tx.send(request.outcome(result));
        });
    }
}

async fn run(
    terminal: &mut Tui,
    state: &mut AppState,
    fetcher: &Arc<dyn Fetch>,
    tx: &UnboundedSender<FetchOutcome>,
    rx: &mut UnboundedReceiver<FetchOutcome>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = EventStream::new();
    let mut tick = tokio::time::interval(Duration::from_millis(TICK_MS));

    loop {
        terminal.draw(|f| ui::draw(f, state))?;

        tokio::select! {
            event = events.next() => match event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    match state.handle_input(key.code) {
                        Action::Quit => break,
                        Action::Fetch(requests) => spawn_fetches(fetcher, tx, requests),
                        Action::None => {}
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            Some(outcome) = rx.recv() => {
                let requests = state.apply(outcome);
                spawn_fetches(fetcher, tx, requests);
            }
            _ = tick.tick() => {}
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.log_file)?;

    let fetcher: Arc<dyn Fetch> = match &args.data_dir {
        Some(dir) => Arc::new(DirFetcher::new(dir)),
        None => Arc::new(HttpFetcher::new()?),
    };
    let menu_url = resolve_url(args.base(), &args.menu);
    info!("loading menu from {menu_url}");
    let catalog = match fetcher.fetch(&menu_url).await {
        Ok(doc) => Catalog::parse(&doc)?,
        Err(e) => {
            error!("cannot load menu: {e}");
            return Err(e.into());
        }
    };
    let index = Arc::new(CatalogIndex::new(catalog));
    let mut state = AppState::new(Selection::new(index, args.base(), args.eager));

    let (tx, mut rx) = unbounded_channel();
    spawn_fetches(&fetcher, &tx, state.start(&args.city));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = run(&mut terminal, &mut state, &fetcher, &tx, &mut rx).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    result
}
