use std::cell::RefCell;
use std::cmp::min;
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::rc::Rc;

/// A scripted server: reads come from a fixed buffer, writes are captured.
///
/// The capture buffer is shared so it can still be inspected after the client owning the stream
/// has been dropped.
pub struct MockStream {
    read_buf: Vec<u8>,
    read_pos: usize,
    written: Rc<RefCell<Vec<u8>>>,
    err_on_read: bool,
    eof_on_read: bool,
    read_delay: usize,
    trickle: bool,
}

impl Default for MockStream {
    fn default() -> Self {
        MockStream {
            read_buf: Vec::new(),
            read_pos: 0,
            written: Rc::new(RefCell::new(Vec::new())),
            err_on_read: false,
            eof_on_read: false,
            read_delay: 0,
            trickle: false,
        }
    }
}

impl MockStream {
    pub fn new(read_buf: Vec<u8>) -> MockStream {
        MockStream::default().with_buf(read_buf)
    }

    pub fn with_buf(mut self, read_buf: Vec<u8>) -> MockStream {
        self.read_buf = read_buf;
        self
    }

    pub fn with_eof(mut self) -> MockStream {
        self.eof_on_read = true;
        self
    }

    pub fn with_err(mut self) -> MockStream {
        self.err_on_read = true;
        self
    }

    /// Return only one byte from the first read.
    pub fn with_delay(mut self) -> MockStream {
        self.read_delay = 1;
        self
    }

    /// Return one byte per read for the whole session, so nothing past the current line is ever
    /// buffered ahead.
    pub fn with_trickle(mut self) -> MockStream {
        self.trickle = true;
        self
    }

    /// Everything the client has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.written.borrow().clone()
    }

    /// A handle onto the capture buffer that outlives the stream.
    pub fn written_handle(&self) -> Rc<RefCell<Vec<u8>>> {
        Rc::clone(&self.written)
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.eof_on_read {
            return Ok(0);
        }
        if self.err_on_read {
            return Err(Error::new(ErrorKind::Other, "MockStream Error"));
        }
        if self.read_pos >= self.read_buf.len() {
            return Err(Error::new(ErrorKind::UnexpectedEof, "EOF"));
        }
        let mut write_len = min(buf.len(), self.read_buf.len() - self.read_pos);
        if self.read_delay > 0 {
            self.read_delay -= 1;
            write_len = min(write_len, 1);
        }
        if self.trickle {
            write_len = min(write_len, 1);
        }
        let max_pos = self.read_pos + write_len;
        buf[..write_len].copy_from_slice(&self.read_buf[self.read_pos..max_pos]);
        self.read_pos += write_len;
        Ok(write_len)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.written.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
