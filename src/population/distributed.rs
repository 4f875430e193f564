use super::{CellPopulation, PopulationError};
use crate::cell::Cell;
use crate::mesh::{Node, NodesOnlyMesh, SpatialRepresentation};
use crate::parallel::{self, Communicator};
use std::collections::BTreeMap;

/// A node leaving this rank, together with the cells attached to it.
type Migrant<const D: usize> = (Node<D>, Vec<Cell>);

impl<const D: usize> CellPopulation<NodesOnlyMesh<D>, D> {
    /// Hands every cell whose node has left this rank's slab to the rank that
    /// now owns it, then refreshes the halo. Collective.
    pub fn update_cell_process_location<C: Communicator>(&mut self, comm: &C) -> Result<(), PopulationError> {
        let rank = comm.rank();
        let size = comm.size();

        let mut outgoing: BTreeMap<usize, Vec<Migrant<D>>> = BTreeMap::new();
        for (dest, node) in self.mesh.take_migrating_nodes() {
            let mut cells = Vec::new();
            for key in self.get_cells_using_location_index(node.index) {
                self.detach(key);
                if let Some(cell) = self.discard_cell(key) {
                    cells.push(cell);
                }
            }
            outgoing.entry(dest).or_default().push((node, cells));
        }
        self.order.retain(|k| self.cells.contains_key(*k));

        let sent: usize = outgoing.values().map(Vec::len).sum();
        for dest in (0..size).filter(|&d| d != rank) {
            let batch = outgoing.remove(&dest).unwrap_or_default();
            comm.send(dest, parallel::encode(&batch, dest)?)?;
        }

        let mut received = 0usize;
        for source in (0..size).filter(|&s| s != rank) {
            let batch: Vec<Migrant<D>> = parallel::decode(&comm.receive(source)?, source)?;
            for (node, cells) in batch {
                let index = node.index;
                self.mesh.receive_migrated_node(node)?;
                for cell in cells {
                    self.insert_cell(cell, index)?;
                }
                received += 1;
            }
        }
        if sent + received > 0 {
            log::debug!("Rank {rank} sent {sent} and received {received} migrating nodes.");
        }

        self.mesh.update_halo_nodes(comm)?;
        self.mesh.refresh_spatial_index()?;
        Ok(())
    }
}
