use anyhow::{anyhow, Result};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::instrument;
use xcb::{
    x::{self, Atom, GetProperty, GrabServer, InternAtom, UngrabServer, Window, ATOM_ANY},
    Connection, Xid,
};

use super::{FocusedWindow, WindowSource};

fn intern_atom(conn: &Connection, name: &[u8]) -> Result<Atom> {
    let reply = conn.wait_for_reply(conn.send_request(&InternAtom {
        only_if_exists: false,
        name,
    }))?;
    Ok(reply.atom())
}

fn read_property(
    conn: &Connection,
    window: Window,
    property: Atom,
    long_length: u32,
) -> Result<x::GetPropertyReply> {
    Ok(conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window,
        property,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length,
    }))?)
}

pub struct X11WindowSource {
    connection: Connection,
    root: Window,
    active_window_atom: Atom,
    window_name_atom: Atom,
    pid_atom: Atom,
    system: System,
}

impl X11WindowSource {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = Connection::connect(None)?;
        // Only 1 x11 screen is supported.
        let root = connection
            .get_setup()
            .roots()
            .nth(preferred_screen.max(0) as usize)
            .ok_or_else(|| anyhow!("X server reported no screen {preferred_screen}"))?
            .root();
        let active_window_atom = intern_atom(&connection, b"_NET_ACTIVE_WINDOW")?;
        let window_name_atom = intern_atom(&connection, b"_NET_WM_NAME")?;
        let pid_atom = intern_atom(&connection, b"_NET_WM_PID")?;
        Ok(Self {
            connection,
            root,
            active_window_atom,
            window_name_atom,
            pid_atom,
            system: System::new(),
        })
    }

    fn active_window(&self) -> Result<Option<Window>> {
        let reply = read_property(&self.connection, self.root, self.active_window_atom, 1)?;
        Ok(reply
            .value::<Window>()
            .first()
            .copied()
            .filter(|w| *w != Window::none()))
    }

    fn app_name(&mut self, window: Window) -> Result<Option<String>> {
        let reply = read_property(&self.connection, window, self.pid_atom, 1)?;
        let Some(pid) = reply.value::<u32>().first().copied() else {
            return Ok(None);
        };
        let pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::default(),
        );
        Ok(self
            .system
            .process(pid)
            .map(|process| process.name().to_string_lossy().into_owned()))
    }

    #[instrument(skip(self))]
    fn focus_inner(&mut self) -> Result<Option<FocusedWindow>> {
        let Some(window) = self.active_window()? else {
            return Ok(None);
        };
        let title = read_property(&self.connection, window, self.window_name_atom, 1024)?;
        let window_title = String::from_utf8_lossy(title.value::<u8>()).into_owned();
        let Some(app_name) = self.app_name(window)? else {
            return Ok(None);
        };
        Ok(Some(FocusedWindow {
            app_name,
            window_title: Some(window_title).filter(|v| !v.is_empty()),
            browser_url: None,
        }))
    }
}

impl WindowSource for X11WindowSource {
    #[instrument(skip(self))]
    fn current_focus(&mut self) -> Result<Option<FocusedWindow>> {
        let _ = self.connection.send_request(&GrabServer {});
        let result = self.focus_inner();
        let _ = self.connection.send_request(&UngrabServer {});
        result
    }
}
