//! Gamepad input.
//!
//! Every joystick found under `/dev/input` gets a reader thread that turns
//! kernel events into the core's [`InputEvent`]s. Buttons are numbered the
//! way the joystick API numbers them, which is what the button profiles use.
//! The D-pad hat arrives as [`InputEvent::Hat`].

use std::sync::mpsc::{ self, Receiver, Sender };

use pocketplay_core::input::{ HatDirection, InputEvent };


// linux/input-event-codes.h
const BTN_MISC: u16 = 0x100;
const BTN_JOYSTICK: u16 = 0x120;
const ABS_HAT0X: u16 = 0x10;
const ABS_HAT0Y: u16 = 0x11;


/// Collects events from every gamepad reader thread.
pub struct Gamepads {
    rx: Receiver<InputEvent>,
    /// Kept so the channel stays open when no gamepad was found
    _tx: Sender<InputEvent>,
}


impl Gamepads {
    /// Opens every joystick present now. Devices plugged in later are not
    /// picked up.
    pub fn open() -> Self {
        let ( tx, rx ) = mpsc::channel();
        let count = spawn_readers( &tx );
        tracing::info!( "Opened {} gamepad(s)", count );
        Self { rx, _tx: tx }
    }


    /// Events received since the last call.
    pub fn drain( &self ) -> impl Iterator<Item = InputEvent> + '_ {
        self.rx.try_iter()
    }
}


/// Joystick button number of `code`, given the key codes the device has.
///
/// Keys from `BTN_JOYSTICK` upward come first, then the `BTN_MISC` block,
/// each in code order.
fn button_index( supported: &[u16], code: u16 ) -> Option<u8> {
    let mut ordered: Vec<u16> = supported.iter().copied().filter( |&c| c >= BTN_JOYSTICK ).collect();
    ordered.sort_unstable();
    let mut misc: Vec<u16> = supported.iter().copied().filter( |&c| ( BTN_MISC..BTN_JOYSTICK ).contains( &c ) ).collect();
    misc.sort_unstable();
    ordered.extend( misc );

    ordered.iter().position( |&c| c == code ).and_then( |i| u8::try_from( i ).ok() )
}


fn hat_direction( axis: u16, value: i32 ) -> Option<HatDirection> {
    let direction = match ( axis, value.signum() ) {
        ( ABS_HAT0X | ABS_HAT0Y, 0 ) => HatDirection::Centered,
        ( ABS_HAT0X, -1 ) => HatDirection::Left,
        ( ABS_HAT0X, 1 ) => HatDirection::Right,
        ( ABS_HAT0Y, -1 ) => HatDirection::Up,
        ( ABS_HAT0Y, 1 ) => HatDirection::Down,
        _ => return None,
    };
    Some( direction )
}


#[cfg( target_os = "linux" )]
fn spawn_readers( tx: &Sender<InputEvent> ) -> usize {
    let mut count = 0;

    for ( path, device ) in evdev::enumerate() {
        let buttons: Vec<u16> = device
            .supported_keys()
            .map( |keys| keys.iter().map( |key| key.code() ).filter( |&c| c >= BTN_MISC ).collect() )
            .unwrap_or_default();
        let has_hat = device
            .supported_absolute_axes()
            .is_some_and( |axes| axes.contains( evdev::AbsoluteAxisType::ABS_HAT0X ) );

        if !buttons.iter().any( |&c| c >= BTN_JOYSTICK ) && !has_hat {
            continue;
        }

        let name = device.name().unwrap_or( "unknown" ).to_string();
        tracing::info!( "Gamepad {:?} at {:?}, {} buttons", name, path, buttons.len() );

        let tx = tx.clone();
        let spawned = std::thread::Builder::new()
            .name( "pocketplay-gamepad".to_string() )
            .spawn( move || read_events( device, &buttons, tx ) );
        match spawned {
            Ok( _ ) => count += 1,
            Err( e ) => tracing::warn!( "Failed to start reader for {:?}: {}", path, e ),
        }
    }

    count
}


#[cfg( not( target_os = "linux" ) )]
fn spawn_readers( _tx: &Sender<InputEvent> ) -> usize {
    tracing::info!( "Gamepad input is only available on Linux" );
    0
}


#[cfg( target_os = "linux" )]
fn read_events( mut device: evdev::Device, buttons: &[u16], tx: Sender<InputEvent> ) {
    loop {
        let events = match device.fetch_events() {
            Ok( events ) => events,
            Err( e ) => {
                tracing::warn!( "Gamepad read failed, giving up on it: {}", e );
                return;
            }
        };

        for event in events {
            if let Some( input ) = translate( event.event_type(), event.code(), event.value(), buttons ) {
                tracing::debug!( "Gamepad input: {:?}", input );
                if tx.send( input ).is_err() {
                    return;
                }
            }
        }
    }
}


/// Converts one kernel event. Only button presses and hat motion count;
/// releases and autorepeat are dropped.
#[cfg( target_os = "linux" )]
fn translate( kind: evdev::EventType, code: u16, value: i32, buttons: &[u16] ) -> Option<InputEvent> {
    if kind == evdev::EventType::KEY {
        if value != 1 {
            return None;
        }
        return button_index( buttons, code ).map( InputEvent::Button );
    }
    if kind == evdev::EventType::ABSOLUTE {
        return hat_direction( code, value ).map( InputEvent::Hat );
    }
    None
}


#[cfg( test )]
mod tests {
    use super::*;

    const BTN_SOUTH: u16 = 0x130;
    const BTN_EAST: u16 = 0x131;
    const BTN_SELECT: u16 = 0x13a;
    const BTN_DPAD_UP: u16 = 0x220;
    const BTN_TRIGGER_HAPPY1: u16 = 0x2c0;


    #[test]
    fn test_button_index_follows_joystick_order() {
        let keys = [ BTN_DPAD_UP, BTN_EAST, BTN_MISC, BTN_SOUTH, BTN_SELECT ];

        assert_eq!( button_index( &keys, BTN_SOUTH ), Some( 0 ) );
        assert_eq!( button_index( &keys, BTN_EAST ), Some( 1 ) );
        assert_eq!( button_index( &keys, BTN_SELECT ), Some( 2 ) );
        assert_eq!( button_index( &keys, BTN_DPAD_UP ), Some( 3 ) );
        // The misc block goes after every joystick button
        assert_eq!( button_index( &keys, BTN_MISC ), Some( 4 ) );
        assert_eq!( button_index( &keys, BTN_TRIGGER_HAPPY1 ), None );
    }


    #[test]
    fn test_hat_direction() {
        assert_eq!( hat_direction( ABS_HAT0X, -1 ), Some( HatDirection::Left ) );
        assert_eq!( hat_direction( ABS_HAT0X, 1 ), Some( HatDirection::Right ) );
        assert_eq!( hat_direction( ABS_HAT0Y, -1 ), Some( HatDirection::Up ) );
        assert_eq!( hat_direction( ABS_HAT0Y, 1 ), Some( HatDirection::Down ) );
        assert_eq!( hat_direction( ABS_HAT0Y, 0 ), Some( HatDirection::Centered ) );
        // Analog sticks are not the hat
        assert_eq!( hat_direction( 0x00, 1 ), None );
    }


    #[cfg( target_os = "linux" )]
    #[test]
    fn test_translate_presses_only() {
        let keys = [ BTN_SOUTH, BTN_EAST ];
        assert_eq!( translate( evdev::EventType::KEY, BTN_EAST, 1, &keys ), Some( InputEvent::Button( 1 ) ) );
        assert_eq!( translate( evdev::EventType::KEY, BTN_EAST, 0, &keys ), None );
        assert_eq!( translate( evdev::EventType::KEY, BTN_EAST, 2, &keys ), None );
        assert_eq!(
            translate( evdev::EventType::ABSOLUTE, ABS_HAT0Y, -1, &keys ),
            Some( InputEvent::Hat( HatDirection::Up ) ),
        );
        assert_eq!( translate( evdev::EventType::SYNCHRONIZATION, 0, 0, &keys ), None );
    }


    #[test]
    fn test_drain_without_devices_is_empty() {
        let ( tx, rx ) = mpsc::channel();
        tx.send( InputEvent::Button( 3 ) ).unwrap();
        let pads = Gamepads { rx, _tx: tx };

        assert_eq!( pads.drain().collect::<Vec<_>>(), vec![ InputEvent::Button( 3 ) ] );
        assert_eq!( pads.drain().count(), 0 );
    }
}
