//! Buffers encoded metrics into one or more frames bounded by a configured
//! size budget (§4.6 of the design): metrics are packed greedily up to the
//! limit, while any single oversized metric still passes through in its own
//! frame rather than being dropped.

use crate::error::Result;

pub(crate) struct BatchBuffer {
    frames: Vec<Vec<u8>>,
    limit: usize,
}

impl BatchBuffer {
    pub(crate) fn new(limit: usize) -> Self {
        BatchBuffer {
            frames: Vec::new(),
            limit,
        }
    }

    /// Append one encoded metric payload (already carrying its trailing
    /// `\n`) following the packing rule.
    pub(crate) fn append(&mut self, payload: &[u8]) {
        let len = payload.len();
        if len > self.limit {
            self.frames.push(payload.to_vec());
            return;
        }
        let needs_new_frame = match self.frames.last() {
            None => true,
            Some(last) => last.len() + len >= self.limit,
        };
        if needs_new_frame {
            self.frames.push(Vec::new());
        }
        self.frames.last_mut().unwrap().extend_from_slice(payload);
    }

    /// Send buffered frames front-to-back via `sender`, removing each frame
    /// only after it has been handed off successfully. On failure, the
    /// remaining frames (including the one that failed) stay buffered for a
    /// subsequent flush.
    pub(crate) fn flush_with<F>(&mut self, mut sender: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        while !self.frames.is_empty() {
            sender(&self.frames[0])?;
            self.frames.remove(0);
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.iter().all(|f| f.is_empty())
    }

    #[cfg(test)]
    pub(crate) fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_d_batch_packing() {
        let mut b = BatchBuffer::new(20);
        b.append(b"fit.a.batch.123:1|c\n");
        b.append(b"_:1|ms\n");
        b.append(b"larger.than.batch.becomes.a.batch:5|c|@0.9\n");
        b.append(b"12:-1|c\n");
        b.append(b"ab:z|s\n");
        b.append(b"small:9|ms\n");
        b.append(b"overflow.previous:10|g\n");
        b.append(b"next:-10|g\n");
        b.append(b"_:1|c\n");

        let frames: Vec<String> = b
            .frames()
            .iter()
            .map(|f| String::from_utf8(f.clone()).unwrap())
            .collect();
        assert_eq!(
            frames,
            vec![
                "fit.a.batch.123:1|c\n".to_string(),
                "_:1|ms\n".to_string(),
                "larger.than.batch.becomes.a.batch:5|c|@0.9\n".to_string(),
                "12:-1|c\nab:z|s\n".to_string(),
                "small:9|ms\n".to_string(),
                "overflow.previous:10|g\n".to_string(),
                "next:-10|g\n_:1|c\n".to_string(),
            ]
        );
    }

    #[test]
    fn flush_leaves_remaining_frames_on_failure() {
        let mut b = BatchBuffer::new(6);
        b.append(b"a:1|c\n");
        b.append(b"b:1|c\n");
        let mut calls = 0;
        let res = b.flush_with(|_frame| {
            calls += 1;
            if calls == 1 {
                Ok(())
            } else {
                Err(crate::error::StatsdError::ClientClosed)
            }
        });
        assert!(res.is_err());
        assert_eq!(b.frames().len(), 1);
    }
}
