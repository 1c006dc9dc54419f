//! Screen rendering.
//!
//! Two screens mirror the session's input modes: the player with the
//! current track and transport buttons, and the library browser. While the
//! screensaver is active nothing is drawn.

use std::path::PathBuf;
use std::time::{ Duration, Instant };

use ratatui::{
    layout::Alignment,
    prelude::*,
    widgets::{ Block, Borders, Clear, List, ListItem, ListState, Paragraph },
};

use pocketplay_core::engine::PlaybackState;
use pocketplay_core::input::InputMode;
use pocketplay_core::metadata::Track;
use pocketplay_core::session::{ ButtonCue, Session };


/// How long a skip button stays highlighted.
const CUE_DURATION: Duration = Duration::from_millis( 250 );


/// Presentation state that outlives a single frame.
pub struct View {
    cue: Option<( ButtonCue, Instant )>,
    /// Current track with its tags, refreshed when the track changes
    track: Option<Track>,
    remote_status: String,
}


impl View {
    pub fn new( remote_status: String ) -> Self {
        Self {
            cue: None,
            track: None,
            remote_status,
        }
    }


    /// Picks up skip cues and re-reads tags after a track change.
    pub fn update( &mut self, session: &mut Session, now: Instant ) {
        if let Some( cue ) = session.take_cue() {
            self.cue = Some(( cue, now ));
        }
        if let Some(( _, since )) = self.cue {
            if now.saturating_duration_since( since ) >= CUE_DURATION {
                self.cue = None;
            }
        }

        let current: Option<PathBuf> = session.engine().playlist().current().cloned();
        let cached = self.track.as_ref().map( |t| &t.path );
        if cached != current.as_ref() {
            self.track = current.as_deref().map( Track::resolve );
        }
    }


    fn highlighted( &self, cue: ButtonCue ) -> bool {
        matches!( self.cue, Some(( active, _ )) if active == cue )
    }
}


/// Draws the whole screen.
pub fn draw( frame: &mut Frame, session: &Session, view: &View ) {
    let area = frame.area();

    if session.screensaver_active() {
        frame.render_widget( Clear, area );
        frame.render_widget( Block::default().style( Style::default().bg( Color::Black ) ), area );
        return;
    }

    let chunks = Layout::default()
        .direction( Direction::Vertical )
        .constraints([
            Constraint::Length( 2 ),  // Header
            Constraint::Min( 0 ),     // Screen
            Constraint::Length( 1 ),  // Status bar
        ])
        .split( area );

    let screen = match session.mode() {
        InputMode::Player => "PLAYER",
        InputMode::Browser => "BROWSER",
    };
    let header = Paragraph::new( format!( "  POCKETPLAY - {}", screen ) )
        .style( Style::default().fg( Color::Cyan ).bold() )
        .block( Block::default().borders( Borders::BOTTOM ) );
    frame.render_widget( header, chunks[0] );

    match session.mode() {
        InputMode::Player => draw_player( frame, session, view, chunks[1] ),
        InputMode::Browser => draw_browser( frame, session, chunks[1] ),
    }

    draw_status_bar( frame, session, view, chunks[2] );
}


fn draw_player( frame: &mut Frame, session: &Session, view: &View, area: Rect ) {
    let chunks = Layout::default()
        .direction( Direction::Vertical )
        .constraints([
            Constraint::Min( 0 ),
            Constraint::Length( 3 ),  // Buttons
        ])
        .split( area );

    let engine = session.engine();
    let playlist = engine.playlist();

    let title = view
        .track
        .as_ref()
        .map( |t| t.display_title.clone() )
        .unwrap_or_else( || "No track".to_string() );

    let position = match playlist.current_index() {
        Some( index ) => format!( "Track {} of {}", index + 1, playlist.len() ),
        None => "Playlist empty".to_string(),
    };

    let cover = match view.track.as_ref().and_then( |t| t.cover.as_ref() ) {
        Some( bytes ) => format!( "Cover art: {} KB", bytes.len().div_ceil( 1024 ) ),
        None => "Cover art: none".to_string(),
    };

    let volume_pct = ( engine.volume() * 100.0 ).round() as usize;
    let filled = volume_pct / 5;
    let volume_bar = format!( "[{}{}] {}%", "█".repeat( filled ), "░".repeat( 20 - filled.min( 20 ) ), volume_pct );

    let lines = vec![
        Line::from( Span::styled( title, Style::default().bold() ) ),
        Line::from( Span::styled( position, Style::default().fg( Color::Gray ) ) ),
        Line::from( "" ),
        Line::from( engine.status_text() ),
        Line::from( format!( "Volume {}", volume_bar ) ),
        Line::from( Span::styled( cover, Style::default().fg( Color::DarkGray ) ) ),
    ];

    let now_playing = Paragraph::new( lines )
        .alignment( Alignment::Center )
        .block( Block::default().title( " Now Playing " ).borders( Borders::ALL ) );
    frame.render_widget( now_playing, chunks[0] );

    let play_label = match engine.state() {
        PlaybackState::Playing => " ⏸ ",
        PlaybackState::Paused | PlaybackState::Stopped => " ▶ ",
    };
    let button = |label: &'static str, lit: bool| {
        let style = if lit {
            Style::default().fg( Color::Black ).bg( Color::Yellow ).bold()
        } else {
            Style::default().fg( Color::White )
        };
        Span::styled( format!( "[{}]", label ), style )
    };

    let buttons = Paragraph::new( Line::from( vec![
        button( " ⏮ ", view.highlighted( ButtonCue::Previous ) ),
        Span::raw( "    " ),
        button( play_label, false ),
        Span::raw( "    " ),
        button( " ⏭ ", view.highlighted( ButtonCue::Next ) ),
    ]))
    .alignment( Alignment::Center )
    .block( Block::default().borders( Borders::TOP ) );
    frame.render_widget( buttons, chunks[1] );
}


fn draw_browser( frame: &mut Frame, session: &Session, area: Rect ) {
    let browser = session.browser();
    let path_str = browser.current_dir().display().to_string();
    let chars: Vec<char> = path_str.chars().collect();
    let title = if chars.len() > 50 {
        format!( " ...{} ", chars[ chars.len() - 47.. ].iter().collect::<String>() )
    } else {
        format!( " {} ", path_str )
    };

    let items: Vec<ListItem> = browser.entries()
        .iter()
        .map( |entry| {
            let ( icon, style ) = if entry.is_dir() {
                ( "▸", Style::default().fg( Color::Blue ) )
            } else {
                ( "♪", Style::default().fg( Color::Green ) )
            };
            ListItem::new( format!( " {} {}", icon, entry.name ) ).style( style )
        })
        .collect();

    let mut state = ListState::default();
    state.select( Some( browser.selected_index() ) );

    let browser_widget = List::new( items )
        .block( Block::default().title( title ).borders( Borders::ALL ) )
        .highlight_style( Style::default().bg( Color::DarkGray ) )
        .highlight_symbol( ">> " );

    frame.render_stateful_widget( browser_widget, area, &mut state );
}


fn draw_status_bar( frame: &mut Frame, session: &Session, view: &View, area: Rect ) {
    let hint = match session.mode() {
        InputMode::Player => " [Space]Play [←→]Skip [↑↓]Vol [r]Repeat [p]Browse [q]Quit ",
        InputMode::Browser => " [Enter]Open [↑↓]Move [←]Up [y]Play dir [p]Player [q]Quit ",
    };

    let text = format!( "{} {}", hint, view.remote_status );
    let status = Paragraph::new( text ).style( Style::default().fg( Color::DarkGray ) );
    frame.render_widget( status, area );
}
