use std::io::{self, ErrorKind};

use crate::socket::NbSocket;
use crate::Result;

#[derive(Debug)]
pub(crate) struct RWBuffer {
    buf: Vec<u8>,
    read_cursor: usize,
    write_cursor: usize,
    max_len: usize,
}

impl RWBuffer {
    pub fn new(init_capacity: usize, max_len: usize) -> Self {
        assert!(max_len >= init_capacity);
        Self {
            buf: vec![0; init_capacity],
            read_cursor: 0,
            write_cursor: 0,
            max_len,
        }
    }

    pub fn remaining_read(&self) -> usize {
        self.write_cursor - self.read_cursor
    }

    pub fn advance_read(&mut self, cnt: usize) {
        self.read_cursor += cnt;
        assert!(self.read_cursor <= self.write_cursor);
        if self.read_cursor == self.write_cursor {
            self.read_cursor = 0;
            self.write_cursor = 0;
        }
    }

    pub fn read_buf(&self) -> &[u8] {
        &self.buf[self.read_cursor..self.write_cursor]
    }

    pub fn advance_write(&mut self, cnt: usize) {
        self.write_cursor += cnt;
        assert!(self.write_cursor <= self.buf.len());
    }

    pub fn remaining_write(&self) -> usize {
        self.buf.len() - self.write_cursor
    }

    pub fn write_buf(&mut self) -> &mut [u8] {
        if self.remaining_write() == 0 {
            self.compact();
        }
        if self.remaining_write() == 0 {
            self.grow();
        }
        &mut self.buf[self.write_cursor..]
    }

    pub fn grow(&mut self) {
        let old_len = self.buf.len();
        let new_len = self.max_len.min((old_len * 15 / 10).max(old_len + 64));
        if new_len > old_len {
            self.buf.resize(new_len, 0);
        }
    }

    pub fn compact(&mut self) {
        if self.read_cursor > 0 {
            self.buf.copy_within(self.read_cursor..self.write_cursor, 0);
            self.write_cursor -= self.read_cursor;
            self.read_cursor = 0;
        }
    }
}

/// Pre-encoded outbound bytes plus a cursor of what has been flushed. A
/// partial non-blocking write keeps the remainder for the next attempt.
#[derive(Debug)]
pub(crate) struct SendBuffer {
    data: Vec<u8>,
    sent: usize,
}

impl SendBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, sent: 0 }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Returns `false` when the socket stopped accepting bytes before the
    /// buffer drained.
    pub fn flush(&mut self, sock: &mut NbSocket) -> Result<bool> {
        while self.sent < self.data.len() {
            match sock.send(&self.data[self.sent..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => self.sent += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }
}
