//! Recorded responses, their headers and assertion outcomes.

use super::memory::{BULK_CHUNK, Tables, insert_unique, require};
use super::StorageError;
use crate::ids::Id;
use crate::models::{HttpResponse, HttpResponseAssert, HttpResponseHeader};

impl Tables {
    pub fn get_response(&self, id: Id) -> Option<HttpResponse> {
        self.responses.get(&id).cloned()
    }

    /// Responses recorded for a live request, newest first.
    pub fn list_responses(&self, http_id: Id) -> Vec<HttpResponse> {
        let mut out: Vec<HttpResponse> = self
            .responses
            .values()
            .filter(|r| r.http_id == http_id)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    pub fn create_response(&mut self, response: HttpResponse) -> Result<(), StorageError> {
        require(&self.http, response.http_id, "response", "http")?;
        insert_unique(&mut self.responses, response.id, response, "response")
    }

    pub fn create_response_headers(
        &mut self,
        headers: Vec<HttpResponseHeader>,
    ) -> Result<(), StorageError> {
        for chunk in headers.chunks(BULK_CHUNK) {
            for header in chunk {
                require(&self.responses, header.response_id, "response_header", "response")?;
                insert_unique(
                    &mut self.response_headers,
                    header.id,
                    header.clone(),
                    "response_header",
                )?;
            }
        }
        Ok(())
    }

    pub fn create_response_asserts(
        &mut self,
        outcomes: Vec<HttpResponseAssert>,
    ) -> Result<(), StorageError> {
        for chunk in outcomes.chunks(BULK_CHUNK) {
            for outcome in chunk {
                require(&self.responses, outcome.response_id, "response_assert", "response")?;
                insert_unique(
                    &mut self.response_asserts,
                    outcome.id,
                    outcome.clone(),
                    "response_assert",
                )?;
            }
        }
        Ok(())
    }

    pub fn list_response_headers(&self, response_id: Id) -> Vec<HttpResponseHeader> {
        self.response_headers
            .values()
            .filter(|h| h.response_id == response_id)
            .cloned()
            .collect()
    }

    pub fn list_response_asserts(&self, response_id: Id) -> Vec<HttpResponseAssert> {
        self.response_asserts
            .values()
            .filter(|a| a.response_id == response_id)
            .cloned()
            .collect()
    }
}
